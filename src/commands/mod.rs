mod backup;
mod database;
mod install;
mod lifecycle;
mod script;
mod status;

pub use backup::{run_backup, run_detect, run_dump, run_restore};
pub use database::run_db;
pub use install::{run_install, run_installed, run_uninstall};
pub use lifecycle::{
    run_clone, run_create, run_delete, run_orphans, run_relocate, run_rename, run_start, run_stop,
};
pub use script::{run_script, run_url};
pub use status::{run_list, run_status};

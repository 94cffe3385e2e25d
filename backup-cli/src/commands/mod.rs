mod backup;
mod drive;
mod schedule;

// Backup commands
pub use backup::{
    locate_backup_file, run_files_backup, run_mysql_backup, show_history, show_record,
};

// Schedule commands
pub use schedule::{
    configure_cron, run_daemon, set_schedule_enabled, set_schedule_type, show_schedule_status,
};

// Drive commands
pub use drive::{
    authorize_drive, delete_drive_file, disconnect_drive, show_auth_url, show_drive_status,
    test_drive_connection,
};

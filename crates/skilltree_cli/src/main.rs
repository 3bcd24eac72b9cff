//! CLI smoke entry point.
//!
//! # Responsibility
//! - Check schema bootstrap of a store from a shell.
//! - Print per-tree statistics for one user when asked.
//!
//! Usage: `skilltree [DB_PATH] [USER_ID] [LOG_DIR]`. Without `DB_PATH` an
//! in-memory database is used. With `LOG_DIR` engine events are written to a
//! rolling log file there.

use skilltree_core::db::{migrations::latest_version, open_db, open_db_in_memory};
use skilltree_core::{SqliteTreeRepository, SqliteUserRepository, TreeStore, UserService};
use std::process::ExitCode;

fn main() -> ExitCode {
    println!("skilltree_core version={}", skilltree_core::core_version());

    let mut args = std::env::args().skip(1);
    let db_path = args.next();
    let user_id = args.next();
    if let Some(log_dir) = args.next() {
        let level = skilltree_core::default_log_level();
        if let Err(err) = skilltree_core::init_logging(level, &log_dir) {
            eprintln!("warning: logging disabled: {err}");
        }
    }

    match run(db_path.as_deref(), user_id.as_deref()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(db_path: Option<&str>, user_id: Option<&str>) -> Result<(), String> {
    let conn = match db_path {
        Some(path) => open_db(path),
        None => open_db_in_memory(),
    }
    .map_err(|err| err.to_string())?;
    println!("schema version={}", latest_version());

    let Some(raw_user_id) = user_id else {
        return Ok(());
    };

    let user_repo = SqliteUserRepository::try_new(&conn).map_err(|err| err.to_string())?;
    let users = UserService::new(user_repo);
    let owner = users
        .authenticate(Some(raw_user_id))
        .map_err(|err| err.to_string())?;

    let tree_repo = SqliteTreeRepository::try_new(&conn).map_err(|err| err.to_string())?;
    let trees = TreeStore::new(tree_repo);
    for tree in trees.list_trees(owner).map_err(|err| err.to_string())? {
        let stats = trees
            .tree_stats(owner, tree.id)
            .map_err(|err| err.to_string())?;
        println!(
            "tree={} skills={} achievements={} completed={} hours={:.2}",
            tree.id,
            stats.total_skills,
            stats.total_achievements,
            stats.achievements_completed,
            stats.total_time_logged
        );
    }
    Ok(())
}

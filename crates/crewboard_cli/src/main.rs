//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `crewboard_core` linkage with deterministic output.
//! - `demo` runs two board sessions against one in-memory store and prints
//!   the converged board.
//! - `CREWBOARD_LOG_DIR`, when set, enables file logging for the run.

use crewboard_core::db::open_db_in_memory;
use crewboard_core::{
    BoardSession, BoardSnapshot, BucketId, ChangeNotifier, EngineConfig, EntityKind, Item, ItemId,
    MeetingStatus, PersistenceStore, SessionError, SqlitePersistenceStore, Status,
};
use log::info;
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    println!("crewboard_core ping={}", crewboard_core::ping());
    println!("crewboard_core version={}", crewboard_core::core_version());

    if let Ok(dir) = std::env::var("CREWBOARD_LOG_DIR") {
        crewboard_core::init_logging(crewboard_core::default_log_level(), &dir)?;
    }

    match std::env::args().nth(1).as_deref() {
        None => Ok(()),
        Some("demo") => run_demo(),
        Some(other) => Err(format!("unknown command `{other}`; expected `demo`").into()),
    }
}

fn run_demo() -> Result<(), Box<dyn Error>> {
    let conn = open_db_in_memory()?;
    let notifier = ChangeNotifier::new();
    let store = SqlitePersistenceStore::new(&conn).with_notifier(notifier.clone());

    for (id, label) in [("todo", "To do"), ("done", "Done"), ("shelf", "Tool shelf")] {
        store.put_bucket(&BucketId::new(id)?, label)?;
    }

    let mut alice = BoardSession::open(&store, EngineConfig::default())?;
    alice.attach(notifier.subscribe_all());
    let mut bob = BoardSession::open(&store, EngineConfig::default())?;
    bob.attach(notifier.subscribe_all());

    let todo = BucketId::new("todo")?;
    let done = BucketId::new("done")?;
    let task = alice.create_item(
        Item::with_id(ItemId::new("T1")?, EntityKind::Task, todo)
            .with_field("title", "Stock shelves"),
    )?;
    let drill = alice.create_item(Item::with_id(
        ItemId::new("drill")?,
        EntityKind::Tool,
        BucketId::new("shelf")?,
    ))?;
    let mut meeting = Item::with_id(ItemId::new("standup")?, EntityKind::Meeting, done.clone());
    meeting.status = Some(Status::Meeting(MeetingStatus::Planned));
    let meeting = alice.create_item(meeting)?;
    bob.pump();

    alice.claim(&drill, "alice")?;
    match bob.claim(&drill, "bob") {
        Err(SessionError::Claim(err)) => println!("bob claim rejected: {err}"),
        Err(err) => return Err(err.into()),
        Ok(()) => println!("bob claim accepted"),
    }

    bob.drag_start(&task)?;
    bob.drag_over(&done)?;
    bob.drop_item(&done, 0)?;

    alice.transition(&meeting, Status::Meeting(MeetingStatus::Ongoing))?;
    alice.transition(&meeting, Status::Meeting(MeetingStatus::Completed))?;

    alice.pump();
    bob.pump();

    print_board("alice", &alice.snapshot());
    print_board("bob", &bob.snapshot());
    println!(
        "workflow fired: alice={} bob={}",
        alice.engine().fired_count(),
        bob.engine().fired_count()
    );
    for notice in bob.notices() {
        println!("bob notice: {} {} ({})", notice.operation, notice.entity, notice.message);
    }
    info!(
        "event=demo_run module=cli status=ok notices={}",
        bob.notices().len()
    );
    Ok(())
}

fn print_board(owner: &str, snapshot: &BoardSnapshot) {
    println!("[{owner}]");
    for bucket in &snapshot.buckets {
        let items: Vec<String> = bucket
            .items
            .iter()
            .map(|item| match &item.claimant {
                Some(holder) => format!("{}@{}", item.id, holder),
                None => match item.status {
                    Some(status) => format!("{}:{}", item.id, status.as_str()),
                    None => item.id.to_string(),
                },
            })
            .collect();
        println!("  {} ({}): {}", bucket.label, bucket.id, items.join(", "));
    }
}

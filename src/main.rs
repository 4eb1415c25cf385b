use tinaflow::command::commands::{CreateNodeCommand, MoveNodeCommand, RenameNodeCommand};
use tinaflow::messaging::NotificationConsumer;
use tinaflow::{
    CommandManager, FlowState, HistoryConfig, NodeId, Position, UndoableCommand,
    create_notification_channel, drain_notifications, logging,
};

// Replays a short editing session against the history and prints what a UI
// would show after each idle tick.
fn main() {
    logging::init();

    println!("=== TinaFlow history ===\n");

    let config = match std::env::args().nth(1) {
        Some(path) => HistoryConfig::load(std::path::Path::new(&path)),
        None => match HistoryConfig::default_path() {
            Some(path) => HistoryConfig::load_or_default(&path),
            None => Ok(HistoryConfig::default()),
        },
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return;
        }
    };

    let (notification_tx, mut notification_rx) =
        create_notification_channel(config.notification_capacity);
    let mut manager = CommandManager::from_config(&config).with_notifier(notification_tx);
    let mut state = FlowState::new();

    apply(
        &mut manager,
        &mut state,
        &mut notification_rx,
        Box::new(CreateNodeCommand::new("OpenExcel", Position::new(0.0, 0.0))),
    );
    apply(
        &mut manager,
        &mut state,
        &mut notification_rx,
        Box::new(RenameNodeCommand::new(NodeId(0), "B")),
    );
    // Two moves inside the merge window collapse into one entry
    for position in [Position::new(40.0, 10.0), Position::new(80.0, 20.0)] {
        apply(
            &mut manager,
            &mut state,
            &mut notification_rx,
            Box::new(MoveNodeCommand::new(NodeId(0), position)),
        );
    }

    println!("\nUndo depth: {}", manager.undo_count());
    println!("History: {:?}", manager.undo_history(0));

    while manager.can_undo() {
        match manager.undo(&mut state) {
            Ok(description) => println!("Undone: {}", description),
            Err(e) => {
                eprintln!("Undo failed: {}", e);
                break;
            }
        }
        idle_tick(&mut notification_rx);
    }

    println!("\nNodes left: {}", state.node_count());
    println!("Redo available: {:?}", manager.redo_history(0));
}

fn apply(
    manager: &mut CommandManager,
    state: &mut FlowState,
    rx: &mut NotificationConsumer,
    command: Box<dyn UndoableCommand>,
) {
    let description = command.description();
    if let Err(e) = manager.execute(command, state) {
        eprintln!("{} failed: {}", description, e);
    }
    idle_tick(rx);
}

fn idle_tick(rx: &mut NotificationConsumer) {
    for notification in drain_notifications(rx) {
        println!("  [{}] {:?}", notification.timestamp, notification.event);
    }
}

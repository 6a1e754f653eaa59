use std::process::ExitCode;

fn main() -> ExitCode {
    converge_cli::main("war-room-db", war_room_db::declarations)
}

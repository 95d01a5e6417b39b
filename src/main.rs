fn main() {
    if let Err(err) = todo_sync_lib::run() {
        eprintln!("todo-sync: {err}");
        std::process::exit(1);
    }
}

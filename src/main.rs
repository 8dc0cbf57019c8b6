fn main() {
    if let Err(e) = QuiverMarks::cli::run() {
        // логгер может быть ещё не поднят (ошибка конфига), поэтому stderr
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn main() {
    if let Err(err) = fiscaudit::cli::run() {
        fiscaudit::ui::eprintln_error(&err);
        std::process::exit(fiscaudit::exit::exit_code(&err));
    }
}

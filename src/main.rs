fn main() -> std::process::ExitCode {
    vpk_manager_lib::run()
}

fn main() -> std::process::ExitCode {
    ai_detector_lib::run()
}

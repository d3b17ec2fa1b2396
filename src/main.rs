fn main() {
    if let Err(e) = gpu_trainer_lib::run() {
        eprintln!("gpu-trainer: {}", e);
        std::process::exit(1);
    }
}

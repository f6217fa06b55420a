use std::env;
use std::fmt::Write as _;
use std::path::PathBuf;

/// (name, default value)
static CONFIGS: &[(&str, usize)] = &[
    ("PAIRING_TIMEOUT_SECS", 30),
    ("MODULE_STOP_TIMEOUT_MS", 2000),
    ("PAIRING_QUEUE_SIZE", 4),
    ("UI_QUEUE_SIZE", 2),
];

fn main() {
    let mut data = String::new();

    for (name, default) in CONFIGS {
        let var = format!("GD_HOST_{}", name);
        println!("cargo:rerun-if-env-changed={}", var);
        let value = match env::var(&var) {
            Ok(value) => match value.parse::<usize>() {
                Ok(value) => value,
                Err(_) => panic!("{} must be an unsigned integer, got {:?}", var, value),
            },
            Err(_) => *default,
        };
        writeln!(&mut data, "pub const {}: usize = {};", name, value).unwrap();
    }

    let out_dir = PathBuf::from(env::var_os("OUT_DIR").unwrap());
    std::fs::write(out_dir.join("config.rs"), data).unwrap();
}

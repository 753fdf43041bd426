use soundstage::app::{self, AppOptions};
use soundstage::model::ContentType;
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    let _log_guard = match soundstage::logging::init() {
        Ok((_, guard)) => Some(guard),
        Err(err) => {
            eprintln!("logging disabled: {err:#}");
            None
        }
    };
    app::run(options)
}

fn parse_args(args: Vec<String>) -> anyhow::Result<AppOptions> {
    let mut out = AppOptions::default();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--null-audio" => out.null_audio = true,
            "--catalog" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--catalog requires a path");
                };
                if value.trim().is_empty() {
                    anyhow::bail!("--catalog cannot be empty");
                }
                out.catalog_path = Some(PathBuf::from(value.trim()));
            }
            "--type" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--type requires sound or interview");
                };
                let Some(content_type) = ContentType::parse(value) else {
                    anyhow::bail!("unknown content type {value}");
                };
                out.content_type = Some(content_type);
            }
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument {other}"),
        }
        index += 1;
    }
    Ok(out)
}

fn print_help() {
    println!("Soundstage");
    println!("  --catalog <path>          JSON track catalog to play from");
    println!("  --type <sound|interview>  Only list tracks of this type");
    println!("  --null-audio              Run without an audio output device");
}

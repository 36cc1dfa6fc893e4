use super::exit_codes;
use crate::cli::args::InitArgs;
use qrewrite_core::config::write_sample_config;

pub fn run(args: InitArgs) -> anyhow::Result<i32> {
    if args.config.exists() && !args.force {
        eprintln!(
            "{} already exists (use --force to overwrite)",
            args.config.display()
        );
        return Ok(exit_codes::FATAL);
    }
    if let Some(parent) = args.config.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    write_sample_config(&args.config)?;
    eprintln!("created {}", args.config.display());
    eprintln!("next: add *.sql files under queries/, an engine fixture and a candidate script");
    Ok(exit_codes::OK)
}

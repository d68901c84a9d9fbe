use std::path::Path;

use clap::Parser;
use droidscript::cli::commands::{cmd_check_doc, cmd_compile, cmd_inspect, cmd_query, cmd_run};
use droidscript::cli::config::{Cli, Commands, load_config};
use droidscript::logging::init_logging;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.verbose, cli.log_file.as_deref().map(Path::new));
    let config = load_config(cli.config.as_deref());

    match cli.command {
        Commands::Compile { script, line_map } => cmd_compile(&script, line_map)?,
        Commands::Inspect { forest, skeleton, doc } => cmd_inspect(&forest, skeleton, doc.as_deref())?,
        Commands::Query { forest, path } => cmd_query(&forest, &path)?,
        Commands::CheckDoc { doc } => cmd_check_doc(&doc)?,
        Commands::Run {
            script,
            doc,
            bridge,
            device_url,
            app,
            output_dir,
            task,
        } => {
            let passed = cmd_run(
                &script,
                &doc,
                bridge.as_deref(),
                device_url.as_deref(),
                app.as_deref(),
                output_dir.as_deref(),
                task.as_deref(),
                &config,
            )?;
            if !passed {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bootseed::Result;
use bootseed::bootloader::{self, bootvars};
use bootseed::image::{self, Options};
use bootseed::rootfs::TargetDirs;
use bootseed::store::{HttpStoreFactory, StoreConfig};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Log output format (filter with RUST_LOG, default "info")
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load config and print the computed task plan
    Plan {
        /// Path to a build definition TOML
        build: PathBuf,
    },
    /// Load config, compute the plan, and execute it
    Run {
        /// Path to a build definition TOML
        build: PathBuf,
        /// Print what would run without executing task bodies
        #[arg(long)]
        dry_run: bool,
    },
    /// Load config and print the fully-resolved TOML (after imports/extends)
    Resolve {
        /// Path to a build definition TOML
        build: PathBuf,
    },
    /// Fetch the gadget and bootstrap a root directory from a model assertion
    Prepare {
        #[arg(long)]
        model: PathBuf,
        #[arg(long)]
        root: PathBuf,
        #[arg(long)]
        gadget_unpack_dir: PathBuf,
        #[arg(long, default_value = "stable")]
        channel: String,
        /// Extra package to seed (name or path to a .pkg file); repeatable
        #[arg(long = "package")]
        packages: Vec<String>,
        /// Directory searched for <name>.pkg before asking the store
        #[arg(long)]
        local_dir: Option<PathBuf>,
        #[arg(long)]
        store_url: Option<String>,
        /// Env var holding a store bearer token
        #[arg(long)]
        store_token_env: Option<String>,
    },
    /// Inspect or confirm boot variables of a target root
    BootVars {
        #[command(subcommand)]
        cmd: BootVarsCommand,
    },
}

#[derive(Debug, Subcommand)]
enum BootVarsCommand {
    /// Print the boot variables and the derived boot state
    Show {
        #[arg(long)]
        root: PathBuf,
    },
    /// Promote a trying kernel/core to stable
    MarkSuccessful {
        #[arg(long)]
        root: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_format);
    match args.cmd {
        Command::Plan { build } => cmd_plan(&build),
        Command::Run { build, dry_run } => cmd_run(&build, dry_run),
        Command::Resolve { build } => cmd_resolve(&build),
        Command::Prepare {
            model,
            root,
            gadget_unpack_dir,
            channel,
            packages,
            local_dir,
            store_url,
            store_token_env,
        } => {
            let opts = Options {
                packages,
                root_dir: root,
                channel,
                model_file: model,
                gadget_unpack_dir,
                local_dir,
            };
            let store = StoreConfig {
                url: store_url.unwrap_or_default(),
                token_env: store_token_env,
                ..Default::default()
            };
            image::prepare(&opts, &HttpStoreFactory::new(store))?;
            println!("prepared {}", opts.target_dirs().root().display());
            Ok(())
        }
        Command::BootVars { cmd } => match cmd {
            BootVarsCommand::Show { root } => cmd_boot_vars_show(&root),
            BootVarsCommand::MarkSuccessful { root } => {
                let bl = bootloader::find_bootloader(&TargetDirs::new(root))?;
                bootvars::mark_boot_successful(bl.as_ref())
            }
        },
    }
}

fn init_logging(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    let res = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if let Err(e) = res {
        eprintln!("WARN: failed to install log subscriber: {e}");
    }
}

fn cmd_plan(path: &Path) -> Result<()> {
    let doc = bootseed::config::load(path)?;
    let plan = bootseed::modules::plan_for(&doc)?;

    let ordered = plan.ordered()?;
    for (i, task) in ordered.iter().enumerate() {
        println!(
            "{:>2}. {:<22}  {:<10} {:<10}  {}",
            i + 1,
            task.id,
            task.module,
            task.phase,
            task.label
        );
    }
    Ok(())
}

fn cmd_resolve(path: &Path) -> Result<()> {
    let doc = bootseed::config::load(path)?;
    let s = toml::to_string_pretty(&doc.value).unwrap_or_else(|_| format!("{:?}", doc.value));
    print!("{s}");
    Ok(())
}

fn cmd_run(path: &Path, dry_run: bool) -> Result<()> {
    let doc = bootseed::config::load(path)?;
    let plan = bootseed::modules::plan_for(&doc)?;

    let reg = bootseed::executor::builtin_registry()?;
    let sink = Arc::new(bootseed::executor::StdoutSink::default());
    let mut ctx = bootseed::executor::ExecCtx::new(dry_run, sink);
    bootseed::executor::execute_plan(&doc, &plan, &reg, &mut ctx)
}

fn cmd_boot_vars_show(root: &Path) -> Result<()> {
    let bl = bootloader::find_bootloader(&TargetDirs::new(root))?;
    println!("bootloader: {}", bl.name());
    for key in [
        bootvars::MODE,
        bootvars::KERNEL,
        bootvars::CORE,
        bootvars::TRY_KERNEL,
        bootvars::TRY_CORE,
    ] {
        println!("{key}={}", bl.get_boot_var(key)?);
    }
    match bootvars::read_state(bl.as_ref())? {
        bootvars::BootState::Stable => println!("state: stable"),
        bootvars::BootState::Trying { .. } => println!("state: trying"),
        bootvars::BootState::Other(mode) => println!("state: unmanaged (mode={mode})"),
    }
    Ok(())
}

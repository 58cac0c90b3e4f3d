// WebsitePanel installer engine
//
// The installer host runs one subcommand per custom action. Progress goes to stdout as JSON
// lines; the exit code is 0 on Success and 1 on Failure.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use panel_installer::api::ImmediateAction;
use panel_installer::installation::workflows::SetupOperation;
use panel_installer::models::components::ComponentKind;
use panel_installer::RunOptions;

#[derive(Parser, Debug)]
#[command(
    name = "panel-installer",
    version,
    about = "WebsitePanel installer orchestration engine"
)]
struct Cli {
    /// Settings file (default: panel-installer.toml next to the executable)
    #[arg(long, global = true, env = "PANEL_INSTALLER_SETTINGS")]
    settings: Option<PathBuf>,

    /// Copy log lines to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an immediate-phase action against a property bag file (updated in place)
    Immediate {
        action: ImmediateAction,
        #[arg(long)]
        bag: PathBuf,
    },
    /// Write the deferred payload of a component from a property bag file
    Payload {
        #[arg(long)]
        bag: PathBuf,
        /// server, eserver or portal
        #[arg(long)]
        component: ComponentKind,
        #[arg(long)]
        out: PathBuf,
    },
    /// Run a deferred workflow (install, remove or maintain)
    Deferred {
        operation: SetupOperation,
        component: ComponentKind,
        #[arg(long)]
        payload: PathBuf,
    },
    /// Stop, back up and clear the previous installation named in the payload
    Prepare {
        #[arg(long)]
        payload: PathBuf,
    },
    /// Install the IIS / ASP.NET / .NET 3.5 features selected in the payload
    WebFeatures {
        #[arg(long)]
        payload: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    let opts = RunOptions {
        settings: cli.settings,
        verbose: cli.verbose,
    };

    let code = match cli.command {
        Command::Immediate { action, bag } => panel_installer::run_immediate_file(&opts, action, &bag),
        Command::Payload { bag, component, out } => {
            panel_installer::run_write_payload(&opts, component, &bag, &out)
        }
        Command::Deferred {
            operation,
            component,
            payload,
        } => panel_installer::run_deferred(&opts, operation, component, &payload),
        Command::Prepare { payload } => panel_installer::run_prepare(&opts, &payload),
        Command::WebFeatures { payload } => panel_installer::run_web_features(&opts, &payload),
    };

    std::process::exit(code);
}

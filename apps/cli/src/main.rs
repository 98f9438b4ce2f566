use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use projconv_conversion::{
    ConversionConfig, ConversionContext, ConverterProvider, LibraryLevel, ModuleSettings,
    ProviderInfo,
};
use serde_json::json;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "projconv",
    about = "Inspect and prepare IDE project files for format conversion",
    author,
    version
)]
struct Cli {
    /// 專案目錄或 .ipr 檔；預設為目前目錄。 / Project directory or .ipr file (defaults to current directory).
    #[arg(long, global = true, value_name = "PATH")]
    project: Option<PathBuf>,

    /// JSON 設定檔路徑。 / Path to a JSON conversion config.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// 應用程式選項目錄（全域函式庫與路徑巨集）。 / Application options directory (global libraries and path macros).
    #[arg(long, global = true, value_name = "DIR")]
    options_dir: Option<PathBuf>,

    /// 提高記錄詳細程度（可重複）。 / Increase log verbosity (repeatable).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 顯示專案配置與模組摘要。 / Show the project layout and module summary.
    Inspect(InspectArgs),
    /// 列出描述此專案的所有檔案。 / List every file describing the project.
    Files,
    /// 展開路徑中的巨集。 / Expand macros in a path.
    Expand(PathArgs),
    /// 將絕對路徑收合為巨集形式。 / Collapse an absolute path into macro form.
    Collapse(PathArgs),
    /// 列出函式庫的類別根路徑。 / List the class roots of a library.
    LibraryRoots(LibraryRootsArgs),
    /// 檢視或更新轉換紀錄。 / Inspect or update the conversion ledger.
    #[command(subcommand)]
    Ledger(LedgerCommand),
}

#[derive(Args)]
struct InspectArgs {
    /// 以 JSON 格式輸出。 / Emit JSON instead of text.
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct PathArgs {
    /// 要轉換的路徑。 / Path to translate.
    path: String,

    /// 以模組範圍轉換（支援 $MODULE_DIR$）。 / Translate in the scope of a module ($MODULE_DIR$).
    #[arg(long, value_name = "NAME")]
    module: Option<String>,
}

#[derive(Args)]
struct LibraryRootsArgs {
    /// 函式庫名稱。 / Library name.
    name: String,

    /// 函式庫層級。 / Library level.
    #[arg(long, value_enum, default_value = "project")]
    level: LevelChoice,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LevelChoice {
    Project,
    Application,
}

impl From<LevelChoice> for LibraryLevel {
    fn from(choice: LevelChoice) -> Self {
        match choice {
            LevelChoice::Project => LibraryLevel::Project,
            LevelChoice::Application => LibraryLevel::Application,
        }
    }
}

#[derive(Subcommand)]
enum LedgerCommand {
    /// 列出已套用的轉換 ID。 / List applied conversion IDs.
    List,
    /// 將轉換標記為已套用並寫回專案。 / Mark conversions as applied and write the ledger.
    Mark {
        /// 轉換 ID。 / Conversion IDs.
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let project = resolve_project(cli.project)?;
    let config = load_config(cli.config.as_deref(), cli.options_dir)?;
    let context = ConversionContext::new(&project, &config)
        .with_context(|| format!("open project {}", project.display()))?;

    match cli.command {
        Commands::Inspect(args) => execute_inspect(&context, args),
        Commands::Files => {
            for file in context.all_project_files() {
                println!("{}", file.display());
            }
            Ok(())
        }
        Commands::Expand(args) => {
            let expanded = match find_module(&context, args.module.as_deref())? {
                Some(module) => context.expand_module_path(&args.path, &module),
                None => context.expand_path(&args.path),
            };
            println!("{expanded}");
            Ok(())
        }
        Commands::Collapse(args) => {
            let collapsed = match find_module(&context, args.module.as_deref())? {
                Some(module) => context.collapse_module_path(&args.path, &module),
                None => context.collapse_path(&args.path),
            };
            println!("{collapsed}");
            Ok(())
        }
        Commands::LibraryRoots(args) => {
            let roots = context.library_class_roots(&args.name, args.level.into());
            if roots.is_empty() {
                eprintln!("No class roots found for library '{}'.", args.name);
            }
            for root in roots {
                println!("{}", root.display());
            }
            Ok(())
        }
        Commands::Ledger(command) => execute_ledger(&context, command),
    }
}

fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_project(project: Option<PathBuf>) -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("determine current directory")?;
    Ok(match project {
        Some(path) if path.is_absolute() => path,
        Some(path) => cwd.join(path),
        None => cwd,
    })
}

fn load_config(path: Option<&Path>, options_dir: Option<PathBuf>) -> Result<ConversionConfig> {
    let config = match path {
        Some(path) => ConversionConfig::load(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => ConversionConfig::default(),
    };
    debug!(?config, "conversion config");
    Ok(match options_dir {
        Some(dir) => config.with_options_dir(dir),
        None => config,
    })
}

fn find_module(
    context: &ConversionContext,
    name: Option<&str>,
) -> Result<Option<std::rc::Rc<ModuleSettings>>> {
    match name {
        Some(name) => context
            .module_settings(name)
            .map(Some)
            .ok_or_else(|| anyhow!("module '{name}' not found")),
        None => Ok(None),
    }
}

fn execute_inspect(context: &ConversionContext, args: InspectArgs) -> Result<()> {
    let missing = context.non_existing_module_files();
    let modules: Vec<_> = context
        .module_files()
        .iter()
        .map(|entry| {
            let exists = !missing.iter().any(|path| path == entry.path());
            json!({
                "path": entry.path().display().to_string(),
                "exists": exists,
            })
        })
        .collect();
    let performed = context.performed_conversion_ids();

    if args.json {
        let report = json!({
            "scheme": context.storage_scheme().as_str(),
            "base_dir": context.project_base_dir().display().to_string(),
            "project_file": context.project_file().display().to_string(),
            "workspace_file": context.workspace_file().display().to_string(),
            "modules": modules,
            "performed_conversions": performed,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serialize report")?
        );
        return Ok(());
    }

    println!("Storage scheme: {}", context.storage_scheme().as_str());
    println!("Base directory: {}", context.project_base_dir().display());
    println!("Project file: {}", context.project_file().display());
    println!("Workspace file: {}", context.workspace_file().display());
    println!("Modules: {}", context.module_files().len());
    for entry in context.module_files() {
        let marker = if missing.iter().any(|path| path == entry.path()) {
            " (missing)"
        } else {
            ""
        };
        println!("  - {}{marker}", entry.path().display());
    }
    println!("Performed conversions: {}", performed.len());
    for id in performed {
        println!("  - {id}");
    }
    Ok(())
}

fn execute_ledger(context: &ConversionContext, command: LedgerCommand) -> Result<()> {
    match command {
        LedgerCommand::List => {
            for id in context.performed_conversion_ids() {
                println!("{id}");
            }
        }
        LedgerCommand::Mark { ids } => {
            let providers: Vec<ProviderInfo> = ids.into_iter().map(ProviderInfo::new).collect();
            let used: Vec<&dyn ConverterProvider> = providers
                .iter()
                .map(|provider| provider as &dyn ConverterProvider)
                .collect();
            context
                .save_files(Vec::<PathBuf>::new(), &used)
                .context("write conversion ledger")?;
            println!("Recorded {} conversion(s).", used.len());
        }
    }
    Ok(())
}

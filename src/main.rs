use clap::{Parser, Subcommand};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use litl_agent::agent::{PredictionContext, Predictor, Reflector};
use litl_agent::config::Config;
use litl_agent::dispatch::PrismDispatchQueue;
use litl_agent::error::{Error, Result};
use litl_agent::experiment::LitlRunner;
use litl_agent::llm::{LLMClient, LanguageModel};
use litl_agent::notes::CalibrationBook;
use litl_agent::prism::{self, PrismTask};
use litl_agent::store::TraceStore;
use litl_agent::tools::{ToolBox, ToolExecutor};

/// Lab-in-the-loop IC50 prediction sandbox over DepMap PRISM
#[derive(Parser, Debug)]
#[command(name = "litl-agent", version, about)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deduplicate the PRISM release into the processed IC50 table
    Wrangle,

    /// List the tools available to the agent
    Tools,

    /// Invoke one tool
    Tool {
        name: String,

        /// Arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },

    /// Inspect or manage a service cache (pubchem, chembl, cellosaurus)
    Cache {
        service: String,

        #[command(subcommand)]
        action: CacheAction,
    },

    /// Predict the IC50 of one drug/cell line pair
    Predict {
        #[arg(long)]
        drug: String,

        #[arg(long)]
        cell_line: String,

        #[arg(long)]
        description: Option<String>,
    },

    /// Run the lab-in-the-loop over PRISM tasks
    Run {
        /// Processed PRISM table (defaults to data.processed)
        #[arg(long)]
        tasks: Option<PathBuf>,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long, default_value = "data/litl/traces.jsonl")]
        traces: PathBuf,

        #[arg(long, default_value = "data/litl/notes.json")]
        notes: PathBuf,

        /// Shuffle the tasks with this seed
        #[arg(long)]
        shuffle: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    Stats,
    Clear {
        /// Confirm deletion of every entry
        #[arg(long)]
        yes: bool,
    },
    Export {
        file: PathBuf,
    },
    Import {
        file: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!(error = %e, "command failed");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    match args.command {
        Command::Wrangle => {
            let data = config
                .data
                .as_ref()
                .ok_or_else(|| Error::Config("missing [data] section".into()))?;
            let (path, report) = prism::run_pipeline(data)?;
            info!(path = %path.display(), rows = report.combined, "PRISM table ready");
            print_json(&report)
        }
        Command::Tools => {
            let toolbox = ToolBox::from_config(&config)?;
            print_json(&toolbox.get_tool_definitions())
        }
        Command::Tool { name, args } => {
            let params: HashMap<String, Value> = serde_json::from_str(&args)?;
            let toolbox = ToolBox::from_config(&config)?;
            if !toolbox.has_tool(&name) {
                return Err(Error::UnknownTool(name));
            }
            let result = toolbox.execute(&name, &params).await;
            println!("{}", result.observation());
            match result.error {
                None => Ok(()),
                Some(msg) => Err(Error::InvalidArgument(msg)),
            }
        }
        Command::Cache { service, action } => {
            let toolbox = ToolBox::from_config(&config)?;
            let cache = toolbox
                .cache(&service)
                .ok_or_else(|| Error::InvalidArgument(format!("unknown service: {}", service)))?;
            match action {
                CacheAction::Stats => print_json(&cache.stats()?),
                CacheAction::Clear { yes } => {
                    let removed = cache.clear(yes)?;
                    info!(service = %service, removed, "cache cleared");
                    Ok(())
                }
                CacheAction::Export { file } => {
                    let n = cache.export(&file)?;
                    info!(service = %service, entries = n, file = %file.display(), "cache exported");
                    Ok(())
                }
                CacheAction::Import { file } => {
                    let n = cache.import(&file)?;
                    info!(service = %service, entries = n, file = %file.display(), "cache imported");
                    Ok(())
                }
            }
        }
        Command::Predict {
            drug,
            cell_line,
            description,
        } => {
            let (model, tools) = agent_parts(&config)?;
            let predictor = Predictor::new(model, tools)
                .with_max_iters(config.agent.max_iters)
                .with_max_tokens(config.llm.max_tokens);
            let task = PrismTask::unmeasured(drug, cell_line, &config.agent.output_unit)
                .with_description(description);
            let trace = predictor
                .predict(&task, &PredictionContext::default())
                .await?;
            print_json(&trace)
        }
        Command::Run {
            tasks,
            limit,
            traces,
            notes,
            shuffle,
        } => {
            let tasks_path = match tasks {
                Some(path) => path,
                None => config
                    .data
                    .as_ref()
                    .map(|d| d.processed.clone())
                    .ok_or_else(|| {
                        Error::Config("pass --tasks or configure data.processed".into())
                    })?,
            };
            let tasks = prism::load_tasks(&tasks_path, &config.agent.output_unit)?;
            let mut queue = PrismDispatchQueue::new("prism", tasks);
            if let Some(seed) = shuffle {
                queue = queue.with_shuffle(seed);
            }

            let (model, tools) = agent_parts(&config)?;
            let predictor = Predictor::new(model.clone(), tools.clone())
                .with_max_iters(config.agent.max_iters)
                .with_max_tokens(config.llm.max_tokens);
            let reflector = Reflector::new(model, tools)
                .with_max_iters(config.agent.max_iters)
                .with_max_tokens(config.llm.max_tokens);

            let book = CalibrationBook::load(&notes)?;
            let mut runner = LitlRunner::new(
                predictor,
                reflector,
                queue,
                TraceStore::new(traces),
                book,
            )
            .with_notes_path(notes);

            let summary = runner.run(limit).await?;
            print_json(&summary)
        }
    }
}

fn agent_parts(config: &Config) -> Result<(Arc<dyn LanguageModel>, Arc<dyn ToolExecutor>)> {
    let model: Arc<dyn LanguageModel> = Arc::new(LLMClient::from_config(&config.llm)?);
    let tools: Arc<dyn ToolExecutor> = Arc::new(ToolBox::from_config(config)?);
    Ok((model, tools))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

use crate::batch::BatchFile;
use async_trait::async_trait;
use colored::Colorize;
use infraproc::{
    BatchFailure, Collaborators, Command, CommandOutcome, CommandOutput, Error, InfraId,
    InfraProcessor, InstanceData, ProcessorConfig, StrategyKind, UserDataStore,
};
use infraproc_backend::{FileStore, ResolverMap};
use infraproc_memory::{
    MemoryCloud, MemoryCloudHandler, MemoryInfoBroker, MemoryServiceComposer, MemoryStore,
};
use std::path::PathBuf;
use std::sync::Arc;

pub struct RunOptions {
    pub file: PathBuf,
    pub parallel: bool,
    pub config: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub teardown: bool,
}

/// Store for a run: started nodes always land in the simulated cloud, so
/// teardown can find them, and also in a `FileStore` when one is configured
struct RunStore {
    file: Option<FileStore>,
    memory: MemoryStore,
}

#[async_trait]
impl UserDataStore for RunStore {
    async fn register_started_node(
        &self,
        infra_id: &InfraId,
        node_name: &str,
        instance_data: &InstanceData,
    ) -> infraproc_backend::Result<()> {
        if let Some(file) = &self.file {
            file.register_started_node(infra_id, node_name, instance_data)
                .await?;
        }
        self.memory
            .register_started_node(infra_id, node_name, instance_data)
            .await
    }
}

pub async fn handle(options: RunOptions) -> anyhow::Result<()> {
    let batch = BatchFile::load(&options.file)?;

    let mut config = match &options.config {
        Some(path) => ProcessorConfig::load(path)?,
        None => infraproc_config::load_config()?,
    };
    if options.parallel {
        config.strategy = StrategyKind::Parallel;
    }

    let cloud = MemoryCloud::new();
    for (node_type, definition) in &batch.node_types {
        cloud.define_node_type(node_type.as_str(), definition.clone());
    }
    if let Some(state) = batch.initial_state {
        cloud.set_initial_state(state);
    }

    let store = RunStore {
        file: options.state_dir.as_ref().map(FileStore::new),
        memory: MemoryStore::new(cloud.clone()),
    };
    let collaborators = Collaborators {
        store: Arc::new(store),
        cloud_handler: Arc::new(MemoryCloudHandler::new(cloud.clone())),
        service_composer: Arc::new(MemoryServiceComposer::new(cloud.clone())),
        info_broker: Arc::new(MemoryInfoBroker::new(cloud.clone())),
        resolver: Arc::new(ResolverMap::with_cooked()),
    };
    let processor = Arc::new(InfraProcessor::builder(collaborators).config(&config).build());

    println!(
        "{}",
        format!(
            "Running {} commands in {} batches ({})",
            batch.command_count(),
            batch.batches.len(),
            processor.strategy_name()
        )
        .bold()
    );

    let interrupt = {
        let processor = Arc::clone(&processor);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{}", "Interrupted, cancelling pending commands...".yellow());
                processor.cancel_pending();
            }
        })
    };

    let result = run_batches(&processor, batch.batches).await;

    if options.teardown {
        teardown(&processor, &cloud).await;
    }
    interrupt.abort();

    result
}

async fn run_batches(processor: &InfraProcessor, batches: Vec<Vec<Command>>) -> anyhow::Result<()> {
    for (index, commands) in batches.into_iter().enumerate() {
        println!();
        println!("{}", format!("■ Batch #{}", index + 1).cyan().bold());

        match processor.push_instructions(commands.clone()).await {
            Ok(outputs) => {
                for (command, output) in commands.iter().zip(&outputs) {
                    print_success(command, output);
                }
            }
            Err(Error::Batch(failure)) => {
                print_outcomes(&commands, &failure);
                anyhow::bail!("Batch #{} failed ({})", index + 1, failure.summary());
            }
            Err(Error::BatchCancelled(failure)) => {
                print_outcomes(&commands, &failure);
                anyhow::bail!("Batch #{} was cancelled ({})", index + 1, failure.summary());
            }
            Err(Error::Cancelled) => {
                println!("  {} batch cancelled", "○".yellow());
                anyhow::bail!("Batch #{} was cancelled", index + 1);
            }
            Err(err) => {
                // Sequential runs stop at the first failure
                println!("  {} {}", "✗".red(), err.to_string().red());
                return Err(anyhow::Error::new(err).context(format!("Batch #{} failed", index + 1)));
            }
        }
    }

    println!();
    println!("{}", "✓ All batches completed".green().bold());
    Ok(())
}

/// Drop every node that started and is still provisioned, then every
/// infrastructure still present; problems are reported but do not change
/// the run's result
async fn teardown(processor: &InfraProcessor, cloud: &MemoryCloud) {
    println!();
    println!("{}", "■ Teardown".cyan().bold());

    let nodes: Vec<InstanceData> = cloud
        .started_nodes()
        .into_iter()
        .map(|started| started.instance_data)
        .filter(|data| {
            data.instance_id()
                .is_some_and(|id| cloud.instance(id).is_some())
        })
        .collect();
    let infrastructures = cloud.infrastructures();

    let mut clean = true;
    for (label, commands) in [
        (
            "nodes",
            nodes
                .into_iter()
                .map(InfraProcessor::cri_drop_node)
                .collect::<Vec<_>>(),
        ),
        (
            "infrastructures",
            infrastructures
                .into_iter()
                .map(InfraProcessor::cri_drop_infrastructure)
                .collect(),
        ),
    ] {
        if commands.is_empty() {
            continue;
        }
        let count = commands.len();
        match processor.push_instructions(commands).await {
            Ok(_) => println!("  {} dropped {} {}", "✓".green(), count, label),
            Err(e) => {
                clean = false;
                println!("  {} {}", "✗".red(), e);
            }
        }
    }

    if clean {
        println!("  {} teardown completed", "✓".green());
    } else {
        println!("  {} teardown incomplete", "✗".red());
    }
}

fn print_outcomes(commands: &[Command], failure: &BatchFailure) {
    for (command, outcome) in commands.iter().zip(&failure.outcomes) {
        match outcome {
            CommandOutcome::Succeeded(output) => print_success(command, output),
            CommandOutcome::Failed(err) => print_failure(command, err),
            CommandOutcome::Cancelled => print_cancelled(command),
        }
    }
}

fn print_success(command: &Command, output: &CommandOutput) {
    println!("  {} {}: {}", "✓".green(), command, describe(output));
}

fn print_failure(command: &Command, err: &Error) {
    println!("  {} {}: {}", "✗".red(), command, err.to_string().red());
}

fn print_cancelled(command: &Command) {
    println!("  {} {}: cancelled", "○".yellow(), command);
}

fn describe(output: &CommandOutput) -> String {
    match output {
        CommandOutput::InfrastructureCreated { handle } => {
            format!("infrastructure created ({})", handle)
        }
        CommandOutput::NodeCreated { instance_data } => format!(
            "node {} started as {} on {}",
            instance_data.node_id(),
            instance_data
                .instance_id()
                .map(|id| id.as_str())
                .unwrap_or("-"),
            instance_data.backend_id().unwrap_or("-")
        ),
        CommandOutput::NodeDropped => "node dropped".to_string(),
        CommandOutput::InfrastructureDropped => "infrastructure dropped".to_string(),
    }
}

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use weave_rs::adk::emitter::{EmittedEvent, Event};
use weave_rs::adk::error::BoxError;
use weave_rs::weave::workflow::{Transition, Workflow, WorkflowLoader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Multiply by repeated addition in a three-step workflow
    Arithmetic {
        #[arg(short, long, allow_hyphen_values = true)]
        x: i64,

        #[arg(short, long, allow_hyphen_values = true)]
        y: i64,
    },
    /// Print the agents declared in a workflow file
    Inspect {
        /// Path to the workflow file
        #[arg(short, long)]
        file: String,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
struct Arithmetic {
    x: i64,
    y: i64,
    remaining: Option<u64>,
    result: Option<i64>,
}

fn arithmetic_workflow() -> anyhow::Result<Workflow<Arithmetic>> {
    let mut workflow = Workflow::new("arithmetic");
    workflow
        .add_step("pre", |state: &mut Arithmetic, _ctx| {
            Box::pin(async move {
                state.result = Some(0);
                state.remaining = Some(state.y.unsigned_abs());
                Ok(Transition::Next)
            })
        })?
        .add_step("loop", |state: &mut Arithmetic, _ctx| {
            Box::pin(async move {
                match state.remaining {
                    Some(n) if n > 0 => {
                        let Some(result) = state.result.unwrap_or_default().checked_add(state.x) else {
                            return Err(BoxError::from(format!("{} * {} overflows i64", state.x, state.y)));
                        };
                        state.result = Some(result);
                        state.remaining = Some(n - 1);
                        Ok(Transition::Repeat)
                    }
                    _ => Ok(Transition::Next),
                }
            })
        })?
        .add_step("post", |state: &mut Arithmetic, _ctx| {
            Box::pin(async move {
                if state.y < 0 {
                    let result = state.result.unwrap_or_default();
                    let Some(negated) = result.checked_neg() else {
                        return Err(BoxError::from(format!("{} * {} overflows i64", state.x, state.y)));
                    };
                    state.result = Some(negated);
                }
                Ok(Transition::End)
            })
        })?;
    Ok(workflow)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Commands::Arithmetic { x, y } => {
            let workflow = arithmetic_workflow()?;
            let output = workflow
                .run(Arithmetic {
                    x,
                    y,
                    ..Default::default()
                })
                .on("success", |event: Arc<EmittedEvent>| async move {
                    if let Event::StepSuccess { step, next, .. } = &event.payload {
                        log::info!("{} -> {}", step, next.as_deref().unwrap_or("end"));
                    }
                    Ok::<(), BoxError>(())
                })
                .await?;

            println!("Steps executed: {}", output.steps.len());
            println!("Result: {}", output.state.result.unwrap_or_default());
        }
        Commands::Inspect { file } => {
            let def = WorkflowLoader::new()
                .load_workflow(&file)
                .with_context(|| format!("failed to load {}", file))?;

            println!("Workflow: {}", def.name);
            if let Some(description) = &def.description {
                println!("  {}", description);
            }
            for (i, agent) in def.agents.iter().enumerate() {
                println!("{}. {} ({:?})", i + 1, agent.name, agent.kind);
                if !agent.tools.is_empty() {
                    println!("   tools: {}", agent.tools.join(", "));
                }
            }
        }
    }

    Ok(())
}

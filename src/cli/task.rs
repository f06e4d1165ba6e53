use anyhow::{bail, Result};
use chrono::Local;
use clap::Subcommand;

use crate::storage::{activity_store::ActivityStore, entities::TaskId};

#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    #[command(about = "Start a task. Whatever was active before is deactivated")]
    Start {
        #[arg(required = true, num_args = 1.., help = "What you're about to work on")]
        description: Vec<String>,
    },
    #[command(about = "Complete the active task, or the one given by --id")]
    Complete {
        #[arg(long)]
        id: Option<TaskId>,
    },
    #[command(about = "Show the active task")]
    Current,
}

pub async fn process_task_command(command: TaskCommand, store: &dyn ActivityStore) -> Result<()> {
    match command {
        TaskCommand::Start { description } => {
            let description = description.join(" ");
            let id = store.create_task(&description).await?;
            println!("Started task {id}: {description}");
        }
        TaskCommand::Complete { id } => {
            let id = match id {
                Some(id) => id,
                None => match store.get_active_task().await? {
                    Some(task) => task.id,
                    None => bail!("there is no active task to complete"),
                },
            };
            store.complete_task(id).await?;
            println!("Completed task {id}");
        }
        TaskCommand::Current => match store.get_active_task().await? {
            Some(task) => println!(
                "{}\t{}\tsince {}",
                task.id,
                task.description,
                task.started_at.with_timezone(&Local).format("%x %H:%M")
            ),
            None => println!("No active task"),
        },
    }
    Ok(())
}

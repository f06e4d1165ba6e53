use std::{
    path::Path,
    sync::{mpsc, Arc},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use rusqlite::Connection;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::migrations::migrate;

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

/// The thread holding the connection. It drains jobs until every sender is gone, so dropping the
/// last [Database] handle finishes queued work before the connection closes.
struct Worker {
    jobs: Option<mpsc::Sender<Job>>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        drop(self.jobs.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Database worker panicked");
            }
        }
    }
}

/// Cloneable handle to a single SQLite connection living on its own thread. Statements run one at
/// a time in submission order and never block the async runtime.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
}

fn configure(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign keys")?;
    // In-memory and some network filesystems refuse WAL; the default journal still works.
    if let Err(e) = conn.pragma_update(None, "journal_mode", "WAL") {
        warn!("Staying on the default journal mode: {e}");
    }
    Ok(())
}

impl Database {
    /// Opens (creating parent directories) and migrates the database, then hands the connection to
    /// the worker thread.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut conn = Connection::open(path)
            .with_context(|| format!("failed to open database {}", path.display()))?;
        configure(&conn)?;
        migrate(&mut conn)?;
        info!("Opened database {}", path.display());

        let (jobs, queue) = mpsc::channel::<Job>();
        let thread = thread::Builder::new()
            .name("acuity-db".into())
            .spawn(move || {
                for job in queue {
                    job(&mut conn);
                }
                debug!("Database worker finished");
            })
            .context("failed to start database worker")?;

        Ok(Self {
            worker: Arc::new(Worker {
                jobs: Some(jobs),
                thread: Some(thread),
            }),
        })
    }

    /// Runs `work` against the connection and waits for its result.
    pub async fn execute<F, T>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        let job: Job = Box::new(move |conn: &mut Connection| {
            // The caller may have stopped waiting; the work is done either way.
            let _ = reply.send(work(conn));
        });

        self.worker
            .jobs
            .as_ref()
            .ok_or_else(|| anyhow!("database worker is closed"))?
            .send(job)
            .map_err(|_| anyhow!("database worker is gone"))?;

        response
            .await
            .map_err(|_| anyhow!("database worker dropped the request"))?
    }
}

//! Executes the actions tagged on a materialized tree.
//!
//! Directories are created inline while walking the tree, so a folder exists
//! before anything below it is scheduled. Files are handed to spawned workers
//! gated by a semaphore; each worker fetches and then stores one file and
//! reports back through a `JoinSet`. One file failing never cancels another.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::paths::local_path_for;
use super::transfer::{LocalStore, RemoteSource, TransferError};
use super::tree::{FolderTree, Materialized, Node};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStage {
    Path,
    Fetch,
    Store,
    /// The worker running the job died before reporting.
    Worker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    pub path: PathBuf,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub name: String,
    pub stage: FetchStage,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirFailure {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub created_dirs: Vec<PathBuf>,
    pub fetched: Vec<FetchedFile>,
    pub failed: Vec<FileFailure>,
    pub failed_dirs: Vec<DirFailure>,
}

impl FetchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.failed_dirs.is_empty()
    }

    pub fn bytes_fetched(&self) -> u64 {
        self.fetched.iter().map(|file| file.bytes).sum()
    }
}

struct FetchJob {
    name: String,
    url: String,
    target: PathBuf,
}

pub struct FetchExecutor<R, S> {
    source: Arc<R>,
    store: Arc<S>,
    limit: Arc<Semaphore>,
}

impl<R: RemoteSource, S: LocalStore> FetchExecutor<R, S> {
    pub fn new(source: R, store: S, concurrency: usize) -> Self {
        Self {
            source: Arc::new(source),
            store: Arc::new(store),
            limit: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    pub async fn execute(&self, tree: &FolderTree<Materialized>) -> FetchReport {
        let mut report = FetchReport::default();
        let root = tree.folder(tree.root()).name();
        let mut workers = JoinSet::new();
        let mut scheduled: Vec<String> = Vec::new();

        for node in tree.walk() {
            match node {
                Node::Folder(id) => {
                    let folder = tree.folder(id);
                    if !folder.is_tagged() {
                        continue;
                    }
                    let created = match local_path_for(root, folder.name()) {
                        Ok(path) => self.store.create_dir(&path).await.map(|()| path),
                        Err(err) => Err(TransferError::from(err)),
                    };
                    match created {
                        Ok(path) => {
                            tracing::debug!(path = %path.display(), "created directory");
                            report.created_dirs.push(path);
                        }
                        Err(err) => {
                            tracing::warn!(name = folder.name(), error = %err, "failed to create directory");
                            report.failed_dirs.push(DirFailure {
                                name: folder.name().to_string(),
                                error: err.to_string(),
                            });
                        }
                    }
                }
                Node::File(id) => {
                    let leaf = tree.file(id);
                    if !leaf.is_tagged() {
                        continue;
                    }
                    let target = match local_path_for(root, leaf.name()) {
                        Ok(target) => target,
                        Err(err) => {
                            tracing::warn!(name = leaf.name(), error = %err, "refusing to map file");
                            report.failed.push(FileFailure {
                                name: leaf.name().to_string(),
                                stage: FetchStage::Path,
                                error: err.to_string(),
                            });
                            continue;
                        }
                    };
                    let job = FetchJob {
                        name: leaf.name().to_string(),
                        url: leaf.source_url().to_string(),
                        target,
                    };
                    self.spawn_job(&mut workers, scheduled.len(), job);
                    scheduled.push(leaf.name().to_string());
                }
            }
        }

        let mut reported = vec![false; scheduled.len()];
        let mut panics = Vec::new();
        while let Some(joined) = workers.join_next().await {
            let (slot, outcome) = match joined {
                Ok(done) => done,
                Err(err) => {
                    tracing::error!(error = %err, "download worker panicked");
                    panics.push(err.to_string());
                    continue;
                }
            };
            reported[slot] = true;
            match outcome {
                Ok(fetched) => report.fetched.push(fetched),
                Err(failure) => {
                    tracing::warn!(
                        name = %failure.name,
                        stage = ?failure.stage,
                        error = %failure.error,
                        "file sync failed"
                    );
                    report.failed.push(failure);
                }
            }
        }

        // A panicking worker never hands back its slot, so whatever is still
        // unreported belongs to one.
        for (name, _) in scheduled
            .into_iter()
            .zip(reported)
            .filter(|(_, reported)| !reported)
        {
            report.failed.push(FileFailure {
                name,
                stage: FetchStage::Worker,
                error: format!("worker panicked: {}", panics.join("; ")),
            });
        }

        tracing::info!(
            dirs = report.created_dirs.len(),
            files = report.fetched.len(),
            failed = report.failed.len() + report.failed_dirs.len(),
            "fetch finished"
        );
        report
    }

    fn spawn_job(
        &self,
        workers: &mut JoinSet<(usize, Result<FetchedFile, FileFailure>)>,
        slot: usize,
        job: FetchJob,
    ) {
        let source = Arc::clone(&self.source);
        let store = Arc::clone(&self.store);
        let limit = Arc::clone(&self.limit);
        workers.spawn(async move {
            let outcome = match limit.acquire_owned().await {
                Ok(_permit) => run_job(source.as_ref(), store.as_ref(), job).await,
                Err(_) => Err(FileFailure {
                    name: job.name,
                    stage: FetchStage::Fetch,
                    error: "download limiter is closed".to_string(),
                }),
            };
            (slot, outcome)
        });
    }
}

async fn run_job<R: RemoteSource, S: LocalStore>(
    source: &R,
    store: &S,
    job: FetchJob,
) -> Result<FetchedFile, FileFailure> {
    tracing::debug!(name = %job.name, "fetching");
    let stream = source
        .fetch_stream(&job.url)
        .await
        .map_err(|err| failure(&job, FetchStage::Fetch, err))?;
    let bytes = store
        .store_path(&job.target, stream)
        .await
        .map_err(|err| failure(&job, FetchStage::Store, err))?;
    tracing::info!(path = %job.target.display(), bytes, "downloaded");
    Ok(FetchedFile {
        path: job.target,
        bytes,
    })
}

fn failure(job: &FetchJob, stage: FetchStage, err: TransferError) -> FileFailure {
    FileFailure {
        name: job.name.clone(),
        stage,
        error: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    use bytes::Bytes;
    use futures_util::{StreamExt, stream};

    use crate::sync::transfer::ByteStream;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        CreateDir(PathBuf),
        Store(PathBuf),
    }

    #[derive(Default)]
    struct RecordingStore {
        events: Mutex<Vec<Event>>,
        files: Mutex<HashMap<PathBuf, Vec<u8>>>,
        fail_on: Option<PathBuf>,
        panic_on: Option<PathBuf>,
    }

    impl LocalStore for RecordingStore {
        async fn create_dir(&self, path: &Path) -> Result<(), TransferError> {
            tokio::task::yield_now().await;
            self.events
                .lock()
                .unwrap()
                .push(Event::CreateDir(path.to_path_buf()));
            Ok(())
        }

        async fn store_path(&self, path: &Path, mut stream: ByteStream) -> Result<u64, TransferError> {
            self.events
                .lock()
                .unwrap()
                .push(Event::Store(path.to_path_buf()));
            if self.fail_on.as_deref() == Some(path) {
                return Err(TransferError::Io(std::io::Error::other("disk full")));
            }
            if self.panic_on.as_deref() == Some(path) {
                panic!("store crashed on {}", path.display());
            }
            let mut body = Vec::new();
            while let Some(chunk) = stream.next().await {
                body.extend_from_slice(&chunk?);
            }
            let len = body.len() as u64;
            self.files.lock().unwrap().insert(path.to_path_buf(), body);
            Ok(len)
        }
    }

    struct StaticSource {
        bodies: HashMap<String, &'static [u8]>,
    }

    impl RemoteSource for StaticSource {
        async fn fetch_stream(&self, url: &str) -> Result<ByteStream, TransferError> {
            tokio::task::yield_now().await;
            match self.bodies.get(url) {
                Some(body) => Ok(stream::iter(vec![Ok(Bytes::from_static(*body))]).boxed()),
                None => Err(TransferError::Io(std::io::Error::other(format!(
                    "404 for {url}"
                )))),
            }
        }
    }

    fn course_tree() -> FolderTree<Materialized> {
        let mut tree = FolderTree::new("course");
        let unit = tree.add_folder(tree.root(), "Unit1");
        let lecture = tree.add_folder(unit, "Lecture");
        tree.add_file(lecture, 10, "slides.pdf", "mem://10", Some(6));
        tree.add_file(lecture, 11, "missing.pdf", "mem://11", None);
        tree.add_file(unit, 12, "syllabus.txt", "mem://12", Some(8));
        tree.materialize()
    }

    fn source() -> StaticSource {
        StaticSource {
            bodies: HashMap::from([
                ("mem://10".to_string(), b"slides".as_slice()),
                ("mem://12".to_string(), b"syllabus".as_slice()),
            ]),
        }
    }

    #[tokio::test]
    async fn creates_folders_before_storing_their_files() {
        let mut tree = course_tree();
        tree.tag_all();
        let executor = FetchExecutor::new(source(), RecordingStore::default(), 2);

        let report = executor.execute(&tree).await;

        let events = executor.store.events.lock().unwrap().clone();
        let position = |event: Event| events.iter().position(|e| *e == event).unwrap();
        let lecture_dir = position(Event::CreateDir(PathBuf::from("course/Unit1/Lecture")));
        let slides = position(Event::Store(PathBuf::from("course/Unit1/Lecture/slides.pdf")));
        let unit_dir = position(Event::CreateDir(PathBuf::from("course/Unit1")));
        let syllabus = position(Event::Store(PathBuf::from("course/Unit1/syllabus.txt")));
        assert!(lecture_dir < slides);
        assert!(unit_dir < syllabus);
        assert!(unit_dir < lecture_dir);
        assert_eq!(report.created_dirs.len(), 3);
    }

    #[tokio::test]
    async fn one_failed_fetch_does_not_stop_the_others() {
        let mut tree = course_tree();
        tree.tag_all();
        let executor = FetchExecutor::new(source(), RecordingStore::default(), 1);

        let report = executor.execute(&tree).await;

        assert!(!report.is_success());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].name, "course/Unit1/Lecture/missing.pdf");
        assert_eq!(report.failed[0].stage, FetchStage::Fetch);

        let mut fetched: Vec<_> = report.fetched.iter().map(|f| f.path.clone()).collect();
        fetched.sort();
        assert_eq!(
            fetched,
            vec![
                PathBuf::from("course/Unit1/Lecture/slides.pdf"),
                PathBuf::from("course/Unit1/syllabus.txt"),
            ]
        );
        assert_eq!(report.bytes_fetched(), 14);
        let files = executor.store.files.lock().unwrap();
        assert_eq!(files[Path::new("course/Unit1/syllabus.txt")], b"syllabus");
    }

    #[tokio::test]
    async fn store_failures_are_reported_per_file() {
        let mut tree = course_tree();
        tree.tag_all();
        let store = RecordingStore {
            fail_on: Some(PathBuf::from("course/Unit1/syllabus.txt")),
            ..RecordingStore::default()
        };
        let executor = FetchExecutor::new(source(), store, 4);

        let report = executor.execute(&tree).await;

        let stages: Vec<_> = report
            .failed
            .iter()
            .map(|f| (f.name.as_str(), f.stage))
            .collect();
        assert!(stages.contains(&("course/Unit1/syllabus.txt", FetchStage::Store)));
        assert!(stages.contains(&("course/Unit1/Lecture/missing.pdf", FetchStage::Fetch)));
        assert_eq!(report.fetched.len(), 1);
    }

    #[tokio::test]
    async fn untagged_nodes_are_skipped_but_descended_into() {
        let mut tree = course_tree();
        let slides = tree.find_file("course/Unit1/Lecture/slides.pdf").unwrap();
        tree.set_file_tag(slides, true);
        let executor = FetchExecutor::new(source(), RecordingStore::default(), 4);

        let report = executor.execute(&tree).await;

        assert!(report.created_dirs.is_empty());
        assert_eq!(report.fetched.len(), 1);
        assert!(report.is_success());
        let events = executor.store.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![Event::Store(PathBuf::from("course/Unit1/Lecture/slides.pdf"))]
        );
    }

    #[tokio::test]
    async fn panicking_worker_is_reported_as_failure() {
        let mut tree = course_tree();
        tree.tag_all();
        let store = RecordingStore {
            panic_on: Some(PathBuf::from("course/Unit1/syllabus.txt")),
            ..RecordingStore::default()
        };
        let executor = FetchExecutor::new(source(), store, 2);

        let report = executor.execute(&tree).await;

        assert!(!report.is_success());
        assert_eq!(report.fetched.len(), 1);
        let crashed: Vec<_> = report
            .failed
            .iter()
            .filter(|f| f.stage == FetchStage::Worker)
            .collect();
        assert_eq!(crashed.len(), 1);
        assert_eq!(crashed[0].name, "course/Unit1/syllabus.txt");
        assert!(crashed[0].error.contains("panicked"));
        // missing.pdf still fails on its own, independently of the crash.
        assert_eq!(report.failed.len(), 2);
    }

    #[tokio::test]
    async fn file_escaping_the_root_is_not_scheduled() {
        let mut tree = FolderTree::new("course");
        tree.add_file(tree.root(), 10, "../slides.pdf", "mem://10", Some(6));
        let mut tree = tree.materialize();
        tree.tag_all();
        let executor = FetchExecutor::new(source(), RecordingStore::default(), 1);

        let report = executor.execute(&tree).await;

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].stage, FetchStage::Path);
        assert!(report.fetched.is_empty());
        let events = executor.store.events.lock().unwrap().clone();
        assert_eq!(events, vec![Event::CreateDir(PathBuf::from("course"))]);
    }
}

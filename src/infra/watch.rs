use crate::domain::{FileChangeKind, HubEvent, TRANSCRIPT_EXTENSION};
use notify::event::{EventKind, ModifyKind};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Keeps a recursive watch on the projects directory alive until dropped.
#[derive(Debug)]
pub struct TranscriptsWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl TranscriptsWatcher {
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[derive(Debug, Error)]
pub enum WatchTranscriptsDirError {
    #[error("watch error: {0}")]
    Notify(#[from] notify::Error),
}

/// Watches `path` recursively and calls `on_change` with one `file_change`
/// event per changed transcript file. The callback runs on the watcher's own
/// thread.
pub fn watch_transcripts_dir<F>(
    path: &Path,
    on_change: F,
) -> Result<TranscriptsWatcher, WatchTranscriptsDirError>
where
    F: Fn(HubEvent) + Send + 'static,
{
    let root = path.to_path_buf();
    let event_root = root.clone();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                for change in transcript_changes(&event_root, &event) {
                    on_change(change);
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "transcript watcher error");
            }
        },
        Config::default(),
    )?;

    watcher.watch(path, RecursiveMode::Recursive)?;

    Ok(TranscriptsWatcher {
        _watcher: watcher,
        root,
    })
}

fn transcript_changes(root: &Path, event: &notify::Event) -> Vec<HubEvent> {
    let Some(kind) = change_kind(&event.kind) else {
        return Vec::new();
    };

    event
        .paths
        .iter()
        .filter(|path| is_transcript_path(path))
        .map(|path| HubEvent::file_change(kind, relative_file_name(root, path)))
        .collect()
}

fn change_kind(kind: &EventKind) -> Option<FileChangeKind> {
    match kind {
        EventKind::Access(_) => None,
        EventKind::Create(_) => Some(FileChangeKind::Create),
        EventKind::Modify(ModifyKind::Name(_)) => Some(FileChangeKind::Rename),
        EventKind::Modify(_) => Some(FileChangeKind::Modify),
        EventKind::Remove(_) => Some(FileChangeKind::Remove),
        _ => Some(FileChangeKind::Other),
    }
}

fn is_transcript_path(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(TRANSCRIPT_EXTENSION)
}

fn relative_file_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

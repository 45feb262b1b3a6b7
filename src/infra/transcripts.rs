use crate::domain::{
    IdentifierError, Message, Project, Session, SubAgent, TranscriptFile,
    classify_transcript_file_name, is_parse_error_record, parse_transcript_lines,
    session_file_name, validate_identifier,
};
use dirs::home_dir;
use std::cmp::Reverse;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveProjectsDirError {
    #[error("home directory not found")]
    HomeDirNotFound,
}

/// Default transcript root, `~/.claude/projects`.
pub fn resolve_projects_dir() -> Result<PathBuf, ResolveProjectsDirError> {
    let Some(home) = home_dir() else {
        return Err(ResolveProjectsDirError::HomeDirNotFound);
    };

    Ok(home.join(".claude").join("projects"))
}

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("projects directory is not readable: {path}: {source}")]
    ProjectsDirUnreadable {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(#[from] IdentifierError),
}

/// Lists every project directory under `projects_dir` that holds at least one
/// session, most recently active first.
pub fn list_projects(projects_dir: &Path) -> Result<Vec<Project>, ReaderError> {
    let entries = match fs::read_dir(projects_dir) {
        Ok(entries) => entries,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            tracing::warn!(path = %projects_dir.display(), "projects directory not found");
            return Ok(Vec::new());
        }
        Err(source) => {
            return Err(ReaderError::ProjectsDirUnreadable {
                path: projects_dir.display().to_string(),
                source,
            });
        }
    };

    let mut projects = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                tracing::warn!(error = %error, "skipping unreadable projects entry");
                continue;
            }
        };
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_dir() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().to_string();
        let project_dir = entry.path();
        let sessions = match list_sessions(&project_dir, &name) {
            Ok(sessions) => sessions,
            Err(error) => {
                tracing::warn!(project = %name, error = %error, "skipping unreadable project");
                continue;
            }
        };
        if sessions.is_empty() {
            continue;
        }

        projects.push(Project {
            name,
            path: project_dir.display().to_string(),
            sessions,
        });
    }

    projects.sort_by(|a, b| {
        let a_modified = a.last_modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let b_modified = b.last_modified().unwrap_or(SystemTime::UNIX_EPOCH);
        b_modified.cmp(&a_modified).then_with(|| a.name.cmp(&b.name))
    });
    Ok(projects)
}

/// Lists the sessions of one project directory (non-recursive), newest first.
///
/// Every agent transcript in the directory is attached to every session: the
/// files carry no parent session id, so association is by directory.
pub fn list_sessions(project_dir: &Path, project_name: &str) -> io::Result<Vec<Session>> {
    let mut session_files: Vec<(String, PathBuf)> = Vec::new();
    let mut agent_files: Vec<(String, PathBuf)> = Vec::new();

    for entry in fs::read_dir(project_dir)? {
        let Ok(entry) = entry else {
            continue;
        };
        if !entry.file_type().is_ok_and(|file_type| file_type.is_file()) {
            continue;
        }
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        match classify_transcript_file_name(file_name) {
            Some(TranscriptFile::Session { id }) => session_files.push((id, entry.path())),
            Some(TranscriptFile::Agent { id }) => agent_files.push((id, entry.path())),
            None => {}
        }
    }

    let agents = load_agents(agent_files);

    let mut sessions = Vec::with_capacity(session_files.len());
    for (id, path) in session_files {
        match load_session(&path, id, project_name, &agents) {
            Ok(session) => sessions.push(session),
            Err(error) => {
                tracing::warn!(path = %path.display(), error = %error, "skipping unreadable session");
            }
        }
    }

    sort_sessions_newest_first(&mut sessions);
    Ok(sessions)
}

/// Loads one session by its identifying pair. `Ok(None)` covers missing and
/// unreadable files; only rejected identifiers are errors.
pub fn get_session(
    projects_dir: &Path,
    project_name: &str,
    session_id: &str,
) -> Result<Option<Session>, ReaderError> {
    let project_name = validate_identifier(project_name)?;
    let session_id = validate_identifier(session_id)?;

    let project_dir = projects_dir.join(project_name);
    let path = project_dir.join(session_file_name(session_id));
    if !path.is_file() {
        return Ok(None);
    }

    let agents = match collect_agent_files(&project_dir) {
        Ok(agent_files) => load_agents(agent_files),
        Err(error) => {
            tracing::warn!(project = %project_name, error = %error, "failed to list agent files");
            Vec::new()
        }
    };

    match load_session(&path, session_id.to_string(), project_name, &agents) {
        Ok(session) => Ok(Some(session)),
        Err(error) => {
            tracing::warn!(path = %path.display(), error = %error, "failed to read session");
            Ok(None)
        }
    }
}

/// Reads a whole transcript file and decodes it line by line.
pub fn parse_transcript_file(path: &Path) -> io::Result<Vec<Message>> {
    let bytes = fs::read(path)?;
    Ok(parse_transcript_lines(&String::from_utf8_lossy(&bytes)))
}

fn collect_agent_files(project_dir: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let mut agent_files = Vec::new();
    for entry in fs::read_dir(project_dir)? {
        let Ok(entry) = entry else {
            continue;
        };
        if !entry.file_type().is_ok_and(|file_type| file_type.is_file()) {
            continue;
        }
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if let Some(TranscriptFile::Agent { id }) = classify_transcript_file_name(file_name) {
            agent_files.push((id, entry.path()));
        }
    }
    Ok(agent_files)
}

fn load_agents(agent_files: Vec<(String, PathBuf)>) -> Vec<SubAgent> {
    let mut agents: Vec<SubAgent> = agent_files
        .into_iter()
        .filter_map(|(id, path)| match load_agent(&path, id) {
            Ok(agent) => Some(agent),
            Err(error) => {
                tracing::warn!(path = %path.display(), error = %error, "skipping unreadable agent");
                None
            }
        })
        .collect();
    agents.sort_by(|a, b| a.id.cmp(&b.id));
    agents
}

fn load_agent(path: &Path, id: String) -> io::Result<SubAgent> {
    let messages = parse_transcript_file(path)?;
    Ok(SubAgent {
        id,
        path: path.display().to_string(),
        modified: modified_time(path),
        message_count: messages.len(),
        messages,
    })
}

fn load_session(
    path: &Path,
    id: String,
    project_name: &str,
    agents: &[SubAgent],
) -> io::Result<Session> {
    let messages = parse_transcript_file(path)?;
    let parse_errors = messages.iter().filter(|m| is_parse_error_record(m)).count();
    if parse_errors > 0 {
        tracing::debug!(path = %path.display(), parse_errors, "session has undecodable lines");
    }
    Ok(Session {
        id,
        project_name: project_name.to_string(),
        path: path.display().to_string(),
        modified: modified_time(path),
        message_count: messages.len(),
        messages,
        agents: agents.to_vec(),
    })
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

fn sort_sessions_newest_first(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| {
        let a_key = Reverse(a.modified.unwrap_or(SystemTime::UNIX_EPOCH));
        let b_key = Reverse(b.modified.unwrap_or(SystemTime::UNIX_EPOCH));
        a_key.cmp(&b_key).then_with(|| a.id.cmp(&b.id))
    });
}

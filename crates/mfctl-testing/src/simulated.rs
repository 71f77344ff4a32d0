//! Deterministic in-memory remote executor.
//!
//! Each node gets its own small filesystem. Uploads, downloads and directory
//! listings act on it directly. Shell commands are recorded, answered from
//! scripted rules, and a handful of file utilities (`mv`, `cp`, `rm`,
//! `mkdir`, `ls`, optionally behind `sudo`/`sudo -u <user>`) are applied to
//! the filesystem so staging sequences leave observable results. Pipelines
//! and redirections are recorded but not interpreted.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use mfctl_core::CommandOutput;
use mfctl_core::Node;
use mfctl_core::RemoteError;
use mfctl_core::RemoteExecutor;
use tokio::sync::Mutex;
use tracing::debug;

/// One call made against the executor, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Execute { node: String, command: String },
    Upload { node: String, remote: String },
    Download { node: String, remote: String },
    UploadDirectory { node: String, remote: String },
    ListDirectory { node: String, remote: String },
}

impl Operation {
    /// Node the operation targeted.
    pub fn node(&self) -> &str {
        match self {
            Operation::Execute { node, .. }
            | Operation::Upload { node, .. }
            | Operation::Download { node, .. }
            | Operation::UploadDirectory { node, .. }
            | Operation::ListDirectory { node, .. } => node,
        }
    }

    /// Whether the operation can change remote state.
    pub fn is_side_effect(&self) -> bool {
        matches!(self, Operation::Execute { .. } | Operation::Upload { .. } | Operation::UploadDirectory { .. })
    }
}

#[derive(Debug, Default)]
struct NodeFs {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

impl NodeFs {
    fn is_dir(&self, path: &str) -> bool {
        if path == "/" || self.dirs.contains(path) {
            return true;
        }
        let prefix = format!("{path}/");
        self.files.keys().any(|k| k.starts_with(&prefix)) || self.dirs.iter().any(|d| d.starts_with(&prefix))
    }

    fn children(&self, path: &str) -> Option<Vec<String>> {
        if !self.is_dir(path) {
            return None;
        }
        let prefix = if path == "/" { "/".to_string() } else { format!("{path}/") };
        let names: BTreeSet<String> = self
            .files
            .keys()
            .chain(self.dirs.iter())
            .filter_map(|p| p.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        Some(names.into_iter().collect())
    }

    fn mkdir_p(&mut self, path: &str) {
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            self.dirs.insert(current.clone());
        }
    }

    fn put(&mut self, path: &str, data: Vec<u8>) {
        if let Some(parent) = parent(path) {
            self.mkdir_p(parent);
        }
        self.files.insert(path.to_string(), data);
    }

    fn remove(&mut self, path: &str) {
        let prefix = format!("{path}/");
        self.files.retain(|k, _| k != path && !k.starts_with(&prefix));
        self.dirs.retain(|d| d != path && !d.starts_with(&prefix));
    }

    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path) || self.is_dir(path)
    }

    /// Final path of `src` moved or copied to `dst`; `None` when `dst` names
    /// an entry whose parent directory does not exist.
    fn target(&self, src: &str, dst: &str) -> Option<String> {
        if self.is_dir(dst) {
            return Some(format!("{}/{}", dst.trim_end_matches('/'), basename(src)));
        }
        match parent(dst) {
            Some(dir) if !self.is_dir(dir) => None,
            _ => Some(dst.to_string()),
        }
    }

    fn rename(&mut self, src: &str, dst: &str) -> bool {
        let Some(dst) = self.target(src, dst) else {
            return false;
        };

        if let Some(data) = self.files.remove(src) {
            self.put(&dst, data);
            return true;
        }

        if !self.is_dir(src) {
            return false;
        }

        let prefix = format!("{src}/");
        let moved_files: Vec<(String, Vec<u8>)> = self
            .files
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(k, v)| (format!("{dst}/{}", &k[prefix.len()..]), v.clone()))
            .collect();
        let moved_dirs: Vec<String> = self
            .dirs
            .iter()
            .filter(|d| d.starts_with(&prefix))
            .map(|d| format!("{dst}/{}", &d[prefix.len()..]))
            .collect();

        self.remove(src);
        self.mkdir_p(&dst);
        for dir in moved_dirs {
            self.mkdir_p(&dir);
        }
        for (path, data) in moved_files {
            self.put(&path, data);
        }
        true
    }

    fn copy(&mut self, src: &str, dst: &str) -> bool {
        let Some(dst) = self.target(src, dst) else {
            return false;
        };
        match self.files.get(src).cloned() {
            Some(data) => {
                self.put(&dst, data);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
enum RuleAction {
    Respond(CommandOutput),
    Fail(String),
}

#[derive(Debug, Clone)]
struct CommandRule {
    node: Option<String>,
    pattern: String,
    action: RuleAction,
}

#[derive(Debug, Clone)]
struct TransferFault {
    node: Option<String>,
    pattern: String,
    /// `None` fails forever.
    remaining: Option<u32>,
    uploads_only: bool,
}

#[derive(Debug, Default)]
struct State {
    nodes: BTreeMap<String, NodeFs>,
    rules: Vec<CommandRule>,
    transfer_faults: Vec<TransferFault>,
    disconnected: BTreeSet<String>,
    log: Vec<Operation>,
}

impl State {
    fn fs(&mut self, node: &str) -> &mut NodeFs {
        self.nodes.entry(node.to_string()).or_default()
    }

    fn check_reachable(&self, node: &Node, operation: &str) -> Result<(), RemoteError> {
        if self.disconnected.contains(&node.name) {
            return Err(transport(node, operation, "node unreachable"));
        }
        Ok(())
    }

    fn take_transfer_fault(&mut self, node: &Node, path: &str, is_upload: bool) -> bool {
        for fault in &mut self.transfer_faults {
            let node_matches = fault.node.as_deref().is_none_or(|n| n == node.name);
            if !node_matches || !path.contains(&fault.pattern) || (fault.uploads_only && !is_upload) {
                continue;
            }
            match fault.remaining.as_mut() {
                None => return true,
                Some(0) => continue,
                Some(n) => {
                    *n -= 1;
                    return true;
                }
            }
        }
        false
    }

    fn find_rule(&self, node: &str, command: &str) -> Option<RuleAction> {
        let specific = self.rules.iter().filter(|r| r.node.as_deref() == Some(node));
        let global = self.rules.iter().filter(|r| r.node.is_none());
        specific.chain(global).find(|r| command.contains(&r.pattern)).map(|r| r.action.clone())
    }
}

/// In-memory [`RemoteExecutor`] for tests.
#[derive(Debug, Default)]
pub struct SimulatedExecutor {
    state: Mutex<State>,
}

impl SimulatedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Filesystem setup and inspection
    // ========================================================================

    /// Place a file on a node. Relative paths resolve against the login home.
    pub async fn add_file(&self, node: &Node, path: &str, contents: impl Into<Vec<u8>>) {
        let path = resolve(node, path);
        self.state.lock().await.fs(&node.name).put(&path, contents.into());
    }

    /// Create a directory (and its parents) on a node.
    pub async fn add_dir(&self, node: &Node, path: &str) {
        let path = resolve(node, path);
        self.state.lock().await.fs(&node.name).mkdir_p(&path);
    }

    pub async fn file(&self, node: &Node, path: &str) -> Option<Vec<u8>> {
        let path = resolve(node, path);
        self.state.lock().await.fs(&node.name).files.get(&path).cloned()
    }

    pub async fn file_text(&self, node: &Node, path: &str) -> Option<String> {
        self.file(node, path).await.map(|b| String::from_utf8_lossy(&b).into_owned())
    }

    pub async fn has_file(&self, node: &Node, path: &str) -> bool {
        self.file(node, path).await.is_some()
    }

    pub async fn has_dir(&self, node: &Node, path: &str) -> bool {
        let path = resolve(node, path);
        self.state.lock().await.fs(&node.name).is_dir(&path)
    }

    /// All file paths on a node starting with `prefix`.
    pub async fn files_under(&self, node: &Node, prefix: &str) -> Vec<String> {
        let prefix = resolve(node, prefix);
        let mut state = self.state.lock().await;
        state.fs(&node.name).files.keys().filter(|k| k.starts_with(&prefix)).cloned().collect()
    }

    // ========================================================================
    // Scripting and fault injection
    // ========================================================================

    /// Answer any command containing `pattern` with `output`.
    pub async fn respond(&self, pattern: &str, output: CommandOutput) {
        self.push_rule(None, pattern, RuleAction::Respond(output)).await;
    }

    /// Answer commands containing `pattern` on one node only.
    pub async fn respond_on(&self, node: &str, pattern: &str, output: CommandOutput) {
        self.push_rule(Some(node), pattern, RuleAction::Respond(output)).await;
    }

    /// Fail any command containing `pattern` with a transport error.
    pub async fn fail_command(&self, pattern: &str) {
        self.push_rule(None, pattern, RuleAction::Fail(format!("injected failure for '{pattern}'")))
            .await;
    }

    /// Fail commands containing `pattern` on one node only.
    pub async fn fail_command_on(&self, node: &str, pattern: &str) {
        self.push_rule(Some(node), pattern, RuleAction::Fail(format!("injected failure for '{pattern}'")))
            .await;
    }

    /// Fail every upload/download whose remote path contains `pattern`.
    pub async fn fail_transfer(&self, pattern: &str) {
        self.push_fault(None, pattern, None, false).await;
    }

    /// Fail transfers matching `pattern` on one node only.
    pub async fn fail_transfer_on(&self, node: &str, pattern: &str) {
        self.push_fault(Some(node), pattern, None, false).await;
    }

    /// Fail uploads (files and directories) matching `pattern` on one node,
    /// leaving downloads working.
    pub async fn fail_uploads_on(&self, node: &str, pattern: &str) {
        self.push_fault(Some(node), pattern, None, true).await;
    }

    /// Fail the next `times` transfers matching `pattern`, then succeed.
    pub async fn fail_transfer_times(&self, pattern: &str, times: u32) {
        self.push_fault(None, pattern, Some(times), false).await;
    }

    /// Make every operation against `node` fail with a transport error.
    pub async fn disconnect(&self, node: &str) {
        self.state.lock().await.disconnected.insert(node.to_string());
    }

    pub async fn reconnect(&self, node: &str) {
        self.state.lock().await.disconnected.remove(node);
    }

    /// Drop all scripted replies and faults, keeping files and the log.
    pub async fn clear_rules(&self) {
        let mut state = self.state.lock().await;
        state.rules.clear();
        state.transfer_faults.clear();
        state.disconnected.clear();
    }

    async fn push_rule(&self, node: Option<&str>, pattern: &str, action: RuleAction) {
        self.state.lock().await.rules.push(CommandRule {
            node: node.map(str::to_string),
            pattern: pattern.to_string(),
            action,
        });
    }

    async fn push_fault(&self, node: Option<&str>, pattern: &str, remaining: Option<u32>, uploads_only: bool) {
        self.state.lock().await.transfer_faults.push(TransferFault {
            node: node.map(str::to_string),
            pattern: pattern.to_string(),
            remaining,
            uploads_only,
        });
    }

    // ========================================================================
    // Operation log
    // ========================================================================

    pub async fn operations(&self) -> Vec<Operation> {
        self.state.lock().await.log.clone()
    }

    /// Operations that could have changed remote state.
    pub async fn side_effects(&self) -> Vec<Operation> {
        self.state.lock().await.log.iter().filter(|op| op.is_side_effect()).cloned().collect()
    }

    /// Every executed command, in order.
    pub async fn commands(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .log
            .iter()
            .filter_map(|op| match op {
                Operation::Execute { command, .. } => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    /// Commands executed on one node, in order.
    pub async fn commands_on(&self, node: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .log
            .iter()
            .filter_map(|op| match op {
                Operation::Execute { node: n, command } if n == node => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn clear_operations(&self) {
        self.state.lock().await.log.clear();
    }
}

#[async_trait]
impl RemoteExecutor for SimulatedExecutor {
    async fn execute(&self, node: &Node, command: &str) -> Result<CommandOutput, RemoteError> {
        let mut state = self.state.lock().await;
        state.log.push(Operation::Execute {
            node: node.name.clone(),
            command: command.to_string(),
        });
        state.check_reachable(node, "execute")?;

        let rule = state.find_rule(&node.name, command);
        if let Some(RuleAction::Fail(message)) = rule {
            return Err(transport(node, "execute", &message));
        }

        let builtin = apply_builtins(state.fs(&node.name), node, command);
        debug!(node = %node.name, command, "simulated execute");

        match rule {
            Some(RuleAction::Respond(output)) => Ok(output),
            _ => Ok(builtin),
        }
    }

    async fn upload_file(&self, node: &Node, local: &Path, remote: &str) -> Result<(), RemoteError> {
        let data = tokio::fs::read(local).await.map_err(|source| RemoteError::LocalIo {
            path: local.to_path_buf(),
            source,
        })?;
        let path = resolve(node, remote);

        let mut state = self.state.lock().await;
        state.log.push(Operation::Upload {
            node: node.name.clone(),
            remote: path.clone(),
        });
        state.check_reachable(node, "upload")?;
        if state.take_transfer_fault(node, &path, true) {
            return Err(transport(node, "upload", &format!("injected failure for {path}")));
        }
        state.fs(&node.name).put(&path, data);
        Ok(())
    }

    async fn download_file(&self, node: &Node, remote: &str, local: &Path) -> Result<(), RemoteError> {
        let path = resolve(node, remote);
        let data = {
            let mut state = self.state.lock().await;
            state.log.push(Operation::Download {
                node: node.name.clone(),
                remote: path.clone(),
            });
            state.check_reachable(node, "download")?;
            if state.take_transfer_fault(node, &path, false) {
                return Err(transport(node, "download", &format!("injected failure for {path}")));
            }
            state.fs(&node.name).files.get(&path).cloned().ok_or_else(|| RemoteError::NotFound {
                node: node.name.clone(),
                path: path.clone(),
            })?
        };

        tokio::fs::write(local, data).await.map_err(|source| RemoteError::LocalIo {
            path: local.to_path_buf(),
            source,
        })
    }

    async fn upload_directory(&self, node: &Node, local: &Path, remote: &str) -> Result<(), RemoteError> {
        let (dirs, files) = read_tree(local).await?;
        let root = resolve(node, remote);

        let mut state = self.state.lock().await;
        state.log.push(Operation::UploadDirectory {
            node: node.name.clone(),
            remote: root.clone(),
        });
        state.check_reachable(node, "upload_directory")?;
        if state.take_transfer_fault(node, &root, true) {
            return Err(transport(node, "upload_directory", &format!("injected failure for {root}")));
        }

        let fs = state.fs(&node.name);
        fs.mkdir_p(&root);
        for dir in dirs {
            fs.mkdir_p(&format!("{root}/{dir}"));
        }
        for (rel, data) in files {
            fs.put(&format!("{root}/{rel}"), data);
        }
        Ok(())
    }

    async fn list_directory(&self, node: &Node, remote: &str) -> Result<Vec<String>, RemoteError> {
        let path = resolve(node, remote);
        let mut state = self.state.lock().await;
        state.log.push(Operation::ListDirectory {
            node: node.name.clone(),
            remote: path.clone(),
        });
        state.check_reachable(node, "list_directory")?;
        state.fs(&node.name).children(&path).ok_or_else(|| RemoteError::NotFound {
            node: node.name.clone(),
            path,
        })
    }
}

/// Interpret the file utilities in `command` against `fs`.
fn apply_builtins(fs: &mut NodeFs, node: &Node, command: &str) -> CommandOutput {
    let mut stdout = String::new();
    let mut stderr = String::new();

    for segment in command.split([';', '\n']).flat_map(|s| s.split("&&")) {
        let segment = segment.trim();
        if segment.is_empty() || segment.contains('|') || segment.contains('>') {
            continue;
        }

        let mut words: Vec<&str> =
            segment.split_whitespace().map(|w| w.trim_matches(|c| c == '\'' || c == '"')).collect();
        while words.first() == Some(&"sudo") {
            words.remove(0);
            if words.first() == Some(&"-u") && words.len() >= 2 {
                words.drain(0..2);
            }
        }

        let Some((program, args)) = words.split_first() else {
            continue;
        };
        let paths: Vec<String> = args.iter().filter(|a| !a.starts_with('-')).map(|p| resolve(node, p)).collect();

        match (*program, paths.as_slice()) {
            ("mv", [src, dst]) => {
                if !fs.rename(src, dst) {
                    stderr.push_str(&missing_path_error("mv", "move", fs.exists(src), src, dst));
                }
            }
            ("cp", [src, dst]) => {
                if !fs.copy(src, dst) {
                    stderr.push_str(&missing_path_error("cp", "create regular file", fs.exists(src), src, dst));
                }
            }
            ("rm", targets) => {
                for target in targets {
                    fs.remove(target);
                }
            }
            ("mkdir", targets) => {
                for target in targets {
                    fs.mkdir_p(target);
                }
            }
            ("ls", [dir]) => match fs.children(dir) {
                Some(entries) => {
                    for entry in entries {
                        stdout.push_str(&entry);
                        stdout.push('\n');
                    }
                }
                None => stderr.push_str(&format!("ls: cannot access '{dir}': No such file or directory\n")),
            },
            _ => {}
        }
    }

    CommandOutput::new(stdout, stderr)
}

/// Collect the directories and files below `root`, as relative paths.
async fn read_tree(root: &Path) -> Result<(Vec<String>, Vec<(String, Vec<u8>)>), RemoteError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| RemoteError::LocalIo { path, source }
    };

    let mut dirs = Vec::new();
    let mut files = Vec::new();
    let mut pending = vec![PathBuf::new()];

    while let Some(rel) = pending.pop() {
        let dir = root.join(&rel);
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(io_err(&dir))?;
        while let Some(entry) = entries.next_entry().await.map_err(io_err(&dir))? {
            let child = rel.join(entry.file_name());
            let file_type = entry.file_type().await.map_err(io_err(&entry.path()))?;
            if file_type.is_dir() {
                dirs.push(child.to_string_lossy().into_owned());
                pending.push(child);
            } else {
                let data = tokio::fs::read(entry.path()).await.map_err(io_err(&entry.path()))?;
                files.push((child.to_string_lossy().into_owned(), data));
            }
        }
    }

    Ok((dirs, files))
}

fn missing_path_error(program: &str, action: &str, source_exists: bool, src: &str, dst: &str) -> String {
    if source_exists {
        format!("{program}: cannot {action} '{dst}': No such file or directory\n")
    } else {
        format!("{program}: cannot stat '{src}': No such file or directory\n")
    }
}

fn transport(node: &Node, operation: &str, message: &str) -> RemoteError {
    RemoteError::Transport {
        node: node.name.clone(),
        operation: operation.to_string(),
        message: message.to_string(),
    }
}

/// Absolute, normalised form of `path` as seen by `node`'s login user.
fn resolve(node: &Node, path: &str) -> String {
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/home/{}/{}", node.username, path)
    };

    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

fn parent(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(p, _)| if p.is_empty() { "/" } else { p })
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

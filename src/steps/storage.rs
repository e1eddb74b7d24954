// file: src/steps/storage.rs
// version: 1.0.0
// guid: st000001-2345-6789-abcd-ef0123456789

//! Data directory creation, log preservation and the persistent bind mount

use crate::config::PathSettings;
use crate::error::ProvisionError;
use crate::system::{shell_quote, CommandExecutor};
use crate::Result;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// A single fstab line describing a bind mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindEntry {
    pub source: PathBuf,
    pub target: PathBuf,
}

impl BindEntry {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// Render as an fstab line
    pub fn render(&self) -> String {
        format!(
            "{} {} none bind 0 0\n",
            self.source.display(),
            self.target.display()
        )
    }

    /// Whether an fstab line already describes this bind
    pub fn matches_line(&self, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return false;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            return false;
        }

        let is_bind = fields[2] == "bind"
            || fields[3]
                .split(',')
                .any(|opt| opt == "bind" || opt == "rbind");

        is_bind
            && Path::new(fields[0]) == self.source.as_path()
            && Path::new(fields[1]) == self.target.as_path()
    }
}

/// Add `entry` to fstab `content` unless an equivalent line exists.
///
/// Returns `None` when nothing needs to change.
pub fn register_bind_mount(content: &str, entry: &BindEntry) -> Option<String> {
    if content.lines().any(|line| entry.matches_line(line)) {
        return None;
    }

    let mut updated = content.to_string();
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(&entry.render());
    Some(updated)
}

/// What is mounted on the log directory before binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDirMount {
    NotMounted,
    /// The data directory is already bound there
    Bound,
    /// Some other filesystem, identified by its source
    Foreign(String),
}

/// Result of the storage stage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageOutcome {
    pub preserved_files: usize,
    pub already_mounted: bool,
    /// Source of a separate log filesystem the bind now covers
    pub shadowed_source: Option<String>,
    pub fstab_updated: bool,
}

/// Fields of the first line of `findmnt -rn` output, unescaped
fn findmnt_fields(output: &str, count: usize) -> Option<Vec<String>> {
    let line = output.lines().find(|l| !l.trim().is_empty())?;
    let fields: Vec<String> = line
        .split_whitespace()
        .map(|f| f.replace("\\x20", " "))
        .collect();
    (fields.len() == count).then_some(fields)
}

/// Filesystem root a bind of `dir` would show, given the mount containing it
fn bind_root(fs_root: &str, mount_target: &str, dir: &Path) -> Option<PathBuf> {
    let relative = dir.strip_prefix(mount_target).ok()?;
    Some(Path::new(fs_root).join(relative))
}

/// Creates the data directory and binds it over the log directory
pub struct StorageManager<'a> {
    exec: &'a mut dyn CommandExecutor,
    paths: &'a PathSettings,
}

impl<'a> StorageManager<'a> {
    pub fn new(exec: &'a mut dyn CommandExecutor, paths: &'a PathSettings) -> Self {
        Self { exec, paths }
    }

    pub fn bind_entry(&self) -> BindEntry {
        BindEntry::new(&self.paths.data_dir, &self.paths.log_dir)
    }

    /// Run the whole storage stage
    pub async fn prepare(&mut self) -> Result<StorageOutcome> {
        let mut outcome = StorageOutcome::default();

        self.ensure_data_dir().await?;

        match self.log_dir_mount().await? {
            LogDirMount::Bound => {
                info!(
                    "{} is already bound to {}, leaving it in place",
                    self.paths.log_dir.display(),
                    self.paths.data_dir.display()
                );
                outcome.already_mounted = true;
            }
            LogDirMount::Foreign(source) => {
                warn!(
                    "{} is a separate mount of {}; binding {} over it",
                    self.paths.log_dir.display(),
                    source,
                    self.paths.data_dir.display()
                );
                outcome.preserved_files = self.preserve_existing_logs().await?;
                self.bind().await?;
                outcome.shadowed_source = Some(source);
            }
            LogDirMount::NotMounted => {
                outcome.preserved_files = self.preserve_existing_logs().await?;
                self.bind().await?;
            }
        }

        outcome.fstab_updated = self.persist().await?;
        Ok(outcome)
    }

    /// Create the data directory if it does not exist
    pub async fn ensure_data_dir(&self) -> Result<()> {
        let dir = &self.paths.data_dir;
        if tokio::fs::metadata(dir).await.is_ok() {
            debug!("Data directory {} already exists", dir.display());
            return Ok(());
        }
        info!("Creating data directory {}", dir.display());
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            ProvisionError::storage(format!("Failed to create {}: {}", dir.display(), e))
        })
    }

    /// Classify the current mount on the log directory.
    ///
    /// A bind shows the data directory's filesystem source with an fs root
    /// equal to the data directory's path inside that filesystem.
    pub async fn log_dir_mount(&mut self) -> Result<LogDirMount> {
        let log_dir = shell_quote(&self.paths.log_dir.to_string_lossy());
        if !self
            .exec
            .check_silent(&format!("mountpoint -q {}", log_dir))
            .await?
        {
            return Ok(LogDirMount::NotMounted);
        }

        let unreadable = |what: &Path, detail: String| {
            ProvisionError::storage(format!(
                "Cannot tell what is mounted on {}: {}",
                what.display(),
                detail
            ))
        };

        let output = self
            .exec
            .execute_with_output(&format!("findmnt -rn -v -o SOURCE,FSROOT {}", log_dir))
            .await
            .map_err(|e| unreadable(&self.paths.log_dir, e.to_string()))?;
        let mounted = findmnt_fields(&output, 2).ok_or_else(|| {
            unreadable(
                &self.paths.log_dir,
                format!("unexpected findmnt output {:?}", output),
            )
        })?;

        let output = self
            .exec
            .execute_with_output(&format!(
                "findmnt -rn -v -o SOURCE,FSROOT,TARGET --target {}",
                shell_quote(&self.paths.data_dir.to_string_lossy())
            ))
            .await
            .map_err(|e| unreadable(&self.paths.data_dir, e.to_string()))?;
        let data = findmnt_fields(&output, 3).ok_or_else(|| {
            unreadable(
                &self.paths.data_dir,
                format!("unexpected findmnt output {:?}", output),
            )
        })?;

        let expected_root = bind_root(&data[1], &data[2], &self.paths.data_dir);
        debug!(
            "{} is {}[{}], bind would be {}[{:?}]",
            self.paths.log_dir.display(),
            mounted[0],
            mounted[1],
            data[0],
            expected_root
        );

        if mounted[0] == data[0] && expected_root.as_deref() == Some(Path::new(&mounted[1])) {
            Ok(LogDirMount::Bound)
        } else {
            Ok(LogDirMount::Foreign(mounted[0].clone()))
        }
    }

    /// Copy current log content into the data directory, keeping existing files
    pub async fn preserve_existing_logs(&self) -> Result<usize> {
        let from = self.paths.log_dir.clone();
        let to = self.paths.data_dir.clone();

        if tokio::fs::metadata(&from).await.is_err() {
            warn!("Log directory {} does not exist, nothing to preserve", from.display());
            return Ok(0);
        }

        let copied = tokio::task::spawn_blocking(move || copy_log_tree(&from, &to))
            .await
            .map_err(|e| ProvisionError::storage(format!("Log copy task failed: {}", e)))??;

        info!("Preserved {} existing log files", copied);
        Ok(copied)
    }

    /// Bind the data directory onto the log directory
    pub async fn bind(&mut self) -> Result<()> {
        let cmd = format!(
            "mount --bind {} {}",
            shell_quote(&self.paths.data_dir.to_string_lossy()),
            shell_quote(&self.paths.log_dir.to_string_lossy())
        );
        info!(
            "Binding {} onto {}",
            self.paths.data_dir.display(),
            self.paths.log_dir.display()
        );
        self.exec.execute(&cmd).await.map_err(|e| {
            ProvisionError::storage(format!(
                "Failed to bind {} onto {} (logs would stay on the system partition): {}",
                self.paths.data_dir.display(),
                self.paths.log_dir.display(),
                e
            ))
        })
    }

    /// Record the bind in the mount table; returns whether the file changed
    pub async fn persist(&self) -> Result<bool> {
        let fstab = &self.paths.fstab;
        let current = match tokio::fs::read_to_string(fstab).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(ProvisionError::storage(format!(
                    "Failed to read {}: {}",
                    fstab.display(),
                    e
                )))
            }
        };

        match register_bind_mount(&current, &self.bind_entry()) {
            Some(updated) => {
                replace_file(fstab, &updated).await.map_err(|e| {
                    ProvisionError::storage(format!("Failed to write {}: {}", fstab.display(), e))
                })?;
                info!("Added bind mount to {}", fstab.display());
                Ok(true)
            }
            None => {
                info!("Bind mount already present in {}", fstab.display());
                Ok(false)
            }
        }
    }
}

/// Write `content` beside `path`, then rename it into place.
///
/// Readers see either the old file or the new one, never a partial write.
async fn replace_file(path: &Path, content: &str) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&parent).await?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "fstab".to_string());
    let staging = parent.join(format!(".{}.firstboot-{}", name, std::process::id()));

    let mut file = tokio::fs::File::create(&staging).await?;
    file.write_all(content.as_bytes()).await?;
    file.sync_all().await?;
    drop(file);

    if let Ok(meta) = tokio::fs::metadata(path).await {
        tokio::fs::set_permissions(&staging, meta.permissions()).await?;
    }

    if let Err(e) = tokio::fs::rename(&staging, path).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(e);
    }
    Ok(())
}

/// Copy the contents of `from` into `to`, skipping files already present
fn copy_log_tree(from: &Path, to: &Path) -> Result<usize> {
    let file_count = WalkDir::new(from)
        .min_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .count();

    let mut options = fs_extra::dir::CopyOptions::new();
    options.content_only = true;
    options.skip_exist = true;
    options.copy_inside = true;

    fs_extra::dir::copy(from, to, &options).map_err(|e| {
        ProvisionError::storage(format!(
            "Failed to copy {} into {}: {}",
            from.display(),
            to.display(),
            e
        ))
    })?;

    Ok(file_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::RecordingExecutor;
    use tempfile::TempDir;

    fn paths(root: &Path) -> PathSettings {
        PathSettings {
            data_dir: root.join("data/log"),
            log_dir: root.join("var/log"),
            fstab: root.join("etc/fstab"),
            ..PathSettings::default()
        }
    }

    #[test]
    fn test_render_bind_entry() {
        let entry = BindEntry::new("/data/log", "/var/log");
        assert_eq!(entry.render(), "/data/log /var/log none bind 0 0\n");
    }

    #[test]
    fn test_matches_line_ignores_spacing_and_comments() {
        let entry = BindEntry::new("/data/log", "/var/log");
        assert!(entry.matches_line("/data/log\t/var/log   none  bind  0 0"));
        assert!(entry.matches_line("/data/log /var/log none defaults,bind 0 0"));
        assert!(!entry.matches_line("# /data/log /var/log none bind 0 0"));
        assert!(!entry.matches_line("/data/log /var/log xfs defaults 0 0"));
        assert!(!entry.matches_line("/other /var/log none bind 0 0"));
    }

    #[test]
    fn test_register_is_idempotent() {
        let entry = BindEntry::new("/data/log", "/var/log");
        let original = "UUID=abc / xfs defaults 0 0";

        let once = register_bind_mount(original, &entry).unwrap();
        assert_eq!(
            once,
            "UUID=abc / xfs defaults 0 0\n/data/log /var/log none bind 0 0\n"
        );
        assert!(register_bind_mount(&once, &entry).is_none());
    }

    #[tokio::test]
    async fn test_prepare_copies_logs_then_binds_and_persists() {
        // Arrange
        let tmp = TempDir::new().unwrap();
        let paths = paths(tmp.path());
        std::fs::create_dir_all(paths.log_dir.join("audit")).unwrap();
        std::fs::create_dir_all(paths.fstab.parent().unwrap()).unwrap();
        std::fs::write(paths.log_dir.join("messages"), "boot ok\n").unwrap();
        std::fs::write(paths.log_dir.join("audit/audit.log"), "type=DAEMON_START\n").unwrap();
        std::fs::write(&paths.fstab, "UUID=abc / xfs defaults 0 0\n").unwrap();
        let mut exec = RecordingExecutor::new().fail("mountpoint", "not a mountpoint");

        // Act
        let outcome = StorageManager::new(&mut exec, &paths).prepare().await.unwrap();

        // Assert
        assert_eq!(outcome.preserved_files, 2);
        assert!(outcome.fstab_updated);
        assert_eq!(
            std::fs::read_to_string(paths.data_dir.join("messages")).unwrap(),
            "boot ok\n"
        );
        assert!(paths.data_dir.join("audit/audit.log").exists());
        assert_eq!(exec.count_of("mount --bind"), 1);
        let fstab = std::fs::read_to_string(&paths.fstab).unwrap();
        assert_eq!(fstab.matches(" none bind 0 0").count(), 1);
    }

    #[tokio::test]
    async fn test_prepare_twice_keeps_single_fstab_entry() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(tmp.path());
        std::fs::create_dir_all(&paths.log_dir).unwrap();
        std::fs::create_dir_all(paths.fstab.parent().unwrap()).unwrap();
        let mut exec = RecordingExecutor::new().fail("mountpoint", "not a mountpoint");

        StorageManager::new(&mut exec, &paths).prepare().await.unwrap();
        let second = StorageManager::new(&mut exec, &paths).prepare().await.unwrap();

        assert!(!second.fstab_updated);
        let fstab = std::fs::read_to_string(&paths.fstab).unwrap();
        let entry = BindEntry::new(&paths.data_dir, &paths.log_dir);
        assert_eq!(fstab.lines().filter(|l| entry.matches_line(l)).count(), 1);
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(tmp.path());
        std::fs::create_dir_all(&paths.log_dir).unwrap();
        std::fs::create_dir_all(paths.fstab.parent().unwrap()).unwrap();
        let mut exec = RecordingExecutor::new()
            .fail("mountpoint", "not a mountpoint")
            .fail("mount --bind", "target is busy");

        let err = StorageManager::new(&mut exec, &paths)
            .prepare()
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Storage(_)));
        assert!(err.to_string().contains("target is busy"));
        // fstab must not advertise a bind that never happened
        assert!(!paths.fstab.exists());
    }

    fn bound_on(exec: RecordingExecutor, root: &Path, log_source: &str) -> RecordingExecutor {
        exec.respond(
            "--target",
            &format!("/dev/sdb1 / {}\n", root.join("data").display()),
        )
        .respond("findmnt", log_source)
    }

    #[tokio::test]
    async fn test_existing_bind_skips_copy_and_bind() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(tmp.path());
        std::fs::create_dir_all(&paths.log_dir).unwrap();
        std::fs::create_dir_all(paths.fstab.parent().unwrap()).unwrap();
        let mut exec = bound_on(RecordingExecutor::new(), tmp.path(), "/dev/sdb1 /log\n");

        let outcome = StorageManager::new(&mut exec, &paths).prepare().await.unwrap();

        assert!(outcome.already_mounted);
        assert_eq!(outcome.shadowed_source, None);
        assert_eq!(exec.count_of("mount --bind"), 0);
        assert!(outcome.fstab_updated);
    }

    #[tokio::test]
    async fn test_separate_log_filesystem_is_bound_over() {
        // Arrange
        let tmp = TempDir::new().unwrap();
        let paths = paths(tmp.path());
        std::fs::create_dir_all(&paths.log_dir).unwrap();
        std::fs::write(paths.log_dir.join("messages"), "from the old volume\n").unwrap();
        let mut exec = bound_on(RecordingExecutor::new(), tmp.path(), "/dev/sdc1 /\n");

        // Act
        let outcome = StorageManager::new(&mut exec, &paths).prepare().await.unwrap();

        // Assert
        assert!(!outcome.already_mounted);
        assert_eq!(outcome.shadowed_source.as_deref(), Some("/dev/sdc1"));
        assert_eq!(outcome.preserved_files, 1);
        assert_eq!(exec.count_of("mount --bind"), 1);
        assert_eq!(
            std::fs::read_to_string(paths.data_dir.join("messages")).unwrap(),
            "from the old volume\n"
        );
        let fstab = std::fs::read_to_string(&paths.fstab).unwrap();
        assert_eq!(fstab.lines().filter(|l| l.contains(" bind ")).count(), 1);
    }

    #[tokio::test]
    async fn test_other_directory_of_data_volume_is_foreign() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(tmp.path());
        std::fs::create_dir_all(&paths.log_dir).unwrap();
        let mut exec = bound_on(RecordingExecutor::new(), tmp.path(), "/dev/sdb1 /archive\n");

        let mount = StorageManager::new(&mut exec, &paths)
            .log_dir_mount()
            .await
            .unwrap();

        assert_eq!(mount, LogDirMount::Foreign("/dev/sdb1".to_string()));
    }

    #[tokio::test]
    async fn test_unreadable_mount_table_aborts() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(tmp.path());
        std::fs::create_dir_all(&paths.log_dir).unwrap();
        let mut exec = RecordingExecutor::new();

        let err = StorageManager::new(&mut exec, &paths)
            .prepare()
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Storage(_)));
        assert_eq!(exec.count_of("mount --bind"), 0);
        assert!(!paths.fstab.exists());
    }

    #[test]
    fn test_findmnt_fields() {
        assert_eq!(
            findmnt_fields("/dev/sdb1 /log\n", 2),
            Some(vec!["/dev/sdb1".to_string(), "/log".to_string()])
        );
        assert_eq!(
            findmnt_fields("/dev/sdb1 /my\\x20logs\n", 2),
            Some(vec!["/dev/sdb1".to_string(), "/my logs".to_string()])
        );
        assert_eq!(findmnt_fields("", 2), None);
        assert_eq!(findmnt_fields("/dev/sdb1 / /data", 2), None);
    }

    #[tokio::test]
    async fn test_fstab_rewrite_keeps_permissions_and_leaves_no_staging_file() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(tmp.path());
        std::fs::create_dir_all(paths.fstab.parent().unwrap()).unwrap();
        std::fs::write(&paths.fstab, "UUID=abc / xfs defaults 0 0\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&paths.fstab, std::fs::Permissions::from_mode(0o644))
                .unwrap();
        }
        let mut exec = RecordingExecutor::new();

        assert!(StorageManager::new(&mut exec, &paths).persist().await.unwrap());

        let fstab = std::fs::read_to_string(&paths.fstab).unwrap();
        assert!(fstab.starts_with("UUID=abc / xfs defaults 0 0\n"));
        let leftovers: Vec<_> = std::fs::read_dir(paths.fstab.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&paths.fstab).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o644);
        }
    }
}

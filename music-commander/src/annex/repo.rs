//! Repository collaborators: metadata branch reader and working-tree
//! predicates, implemented over the `git` and `git-annex` binaries.

use async_trait::async_trait;
use mc_common::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Name of the dedicated metadata branch.
pub const METADATA_BRANCH: &str = "git-annex";

/// Suffix of per-key metadata log blobs on the metadata branch.
pub const LOG_SUFFIX: &str = ".log.met";

/// One metadata log blob on the metadata branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBlobRef {
    /// Opaque blob identifier usable with `read_blobs`.
    pub blob_id: String,
    /// Branch-relative path, e.g. `xxx/yyy/KEY.log.met`.
    pub path: String,
}

/// Read access to the metadata branch and the annex working tree.
///
/// The cache builder depends only on this trait; tests drive it with an
/// in-memory implementation.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Commit pointer of the metadata branch, or `None` when the branch
    /// does not exist yet.
    async fn current_branch_pointer(&self) -> Result<Option<String>>;

    /// Every `*.log.met` blob on the metadata branch.
    async fn list_log_blobs(&self) -> Result<Vec<LogBlobRef>>;

    /// Bulk-read blob contents by identifier. Missing blobs are omitted
    /// from the result.
    async fn read_blobs(&self, blob_ids: &[String]) -> Result<Vec<(String, Vec<u8>)>>;

    /// Read one blob by branch path at the current pointer. `None` when
    /// the path no longer exists (the key was deleted).
    async fn read_blob_at_path(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Paths changed between two branch pointers.
    async fn diff_changed_paths(&self, old: &str, new: &str) -> Result<Vec<String>>;

    /// Current working-tree mapping of annex key to repo-relative path,
    /// including files whose content is not locally present.
    async fn list_all_annexed_paths(&self) -> Result<HashMap<String, String>>;

    /// Keys whose object-store content is locally materialized.
    async fn list_present_keys(&self) -> Result<HashSet<String>>;
}

/// Derive the annex key from a metadata log path by stripping the hash
/// directory prefix and the `.log.met` suffix.
pub fn key_from_log_path(path: &str) -> String {
    let filename = path.rsplit('/').next().unwrap_or(path);
    filename
        .strip_suffix(LOG_SUFFIX)
        .unwrap_or(filename)
        .to_string()
}

/// `MetadataSource` implementation over a local git-annex repository.
#[derive(Debug, Clone)]
pub struct GitAnnexRepo {
    repo_path: PathBuf,
}

impl GitAnnexRepo {
    /// Wrap a repository root, verifying it is an initialized git-annex
    /// repository.
    pub async fn open(repo_path: &Path) -> Result<Self> {
        if !repo_path.join(".git").exists() {
            return Err(Error::NotGitRepo(repo_path.to_path_buf()));
        }
        let repo = Self {
            repo_path: repo_path.to_path_buf(),
        };
        let output = repo.git(&["config", "--get", "annex.uuid"], None).await?;
        if !output.status.success() {
            return Err(Error::NotAnnexRepo(repo_path.to_path_buf()));
        }
        Ok(repo)
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Run a git subcommand in the repository, optionally feeding stdin.
    async fn git(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<std::process::Output> {
        debug!("git {}", args.join(" "));
        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.repo_path)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| Error::Git(format!("git: {e}")))?;
        if let Some(input) = stdin {
            let mut handle = child
                .stdin
                .take()
                .ok_or_else(|| Error::Internal("child stdin unavailable".into()))?;
            handle.write_all(input).await?;
            drop(handle);
        }
        child
            .wait_with_output()
            .await
            .map_err(|e| Error::Git(format!("git: {e}")))
    }

    /// Like [`Self::git`] but fails on non-zero exit, carrying stderr.
    async fn git_checked(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<Vec<u8>> {
        let output = self.git(args, stdin).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Git(format!(
                "git {} failed: {}",
                args.first().unwrap_or(&""),
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl MetadataSource for GitAnnexRepo {
    async fn current_branch_pointer(&self) -> Result<Option<String>> {
        let output = self.git(&["rev-parse", METADATA_BRANCH], None).await?;
        if !output.status.success() {
            return Ok(None);
        }
        let pointer = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!pointer.is_empty()).then_some(pointer))
    }

    async fn list_log_blobs(&self) -> Result<Vec<LogBlobRef>> {
        let stdout = self
            .git_checked(&["ls-tree", "-r", METADATA_BRANCH], None)
            .await?;
        let text = String::from_utf8_lossy(&stdout);

        // Format: <mode> <type> <hash>\t<path>
        let mut blobs = Vec::new();
        for line in text.lines() {
            if !line.ends_with(LOG_SUFFIX) {
                continue;
            }
            let Some((meta, path)) = line.split_once('\t') else {
                continue;
            };
            let mut meta_parts = meta.split_whitespace();
            let (Some(_mode), Some(kind), Some(hash)) =
                (meta_parts.next(), meta_parts.next(), meta_parts.next())
            else {
                continue;
            };
            if kind != "blob" {
                continue;
            }
            blobs.push(LogBlobRef {
                blob_id: hash.to_string(),
                path: path.to_string(),
            });
        }
        Ok(blobs)
    }

    async fn read_blobs(&self, blob_ids: &[String]) -> Result<Vec<(String, Vec<u8>)>> {
        if blob_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut input = blob_ids.join("\n");
        input.push('\n');
        let stdout = self
            .git_checked(&["cat-file", "--batch"], Some(input.as_bytes()))
            .await?;

        // Each response: "<hash> blob <size>\n<content>\n" or "<hash> missing\n"
        let mut results = Vec::with_capacity(blob_ids.len());
        let mut pos = 0usize;
        while pos < stdout.len() {
            let Some(nl) = stdout[pos..].iter().position(|&b| b == b'\n') else {
                break;
            };
            let header = String::from_utf8_lossy(&stdout[pos..pos + nl]).into_owned();
            pos += nl + 1;

            let mut parts = header.split_whitespace();
            let Some(hash) = parts.next() else { continue };
            match (parts.next(), parts.next()) {
                (Some("blob"), Some(size)) => {
                    let size: usize = size
                        .parse()
                        .map_err(|_| Error::Git(format!("bad cat-file header: {header}")))?;
                    if pos + size > stdout.len() {
                        break;
                    }
                    results.push((hash.to_string(), stdout[pos..pos + size].to_vec()));
                    pos += size;
                    // Trailing newline after blob content
                    if stdout.get(pos) == Some(&b'\n') {
                        pos += 1;
                    }
                }
                _ => continue,
            }
        }
        Ok(results)
    }

    async fn read_blob_at_path(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let spec = format!("{METADATA_BRANCH}:{path}");
        let output = self.git(&["cat-file", "-p", &spec], None).await?;
        if output.status.success() {
            Ok(Some(output.stdout))
        } else {
            Ok(None)
        }
    }

    async fn diff_changed_paths(&self, old: &str, new: &str) -> Result<Vec<String>> {
        let stdout = self
            .git_checked(&["diff-tree", "-r", "--name-only", old, new], None)
            .await?;
        let text = String::from_utf8_lossy(&stdout);
        Ok(text
            .lines()
            .filter(|line| line.ends_with(LOG_SUFFIX))
            .map(str::to_string)
            .collect())
    }

    async fn list_all_annexed_paths(&self) -> Result<HashMap<String, String>> {
        let stdout = self
            .git_checked(
                &[
                    "annex",
                    "find",
                    "--include=*",
                    "--format=${key}\t${file}\n",
                ],
                None,
            )
            .await?;
        let text = String::from_utf8_lossy(&stdout);
        let mut map = HashMap::new();
        for line in text.lines() {
            if let Some((key, file)) = line.split_once('\t') {
                map.insert(key.to_string(), file.to_string());
            }
        }
        Ok(map)
    }

    async fn list_present_keys(&self) -> Result<HashSet<String>> {
        let stdout = self
            .git_checked(&["annex", "find", "--format=${key}\n"], None)
            .await?;
        let text = String::from_utf8_lossy(&stdout);
        Ok(text.lines().filter(|l| !l.is_empty()).map(str::to_string).collect())
    }
}

/// True if the path is a git-annex symlink into the object store.
pub fn is_annexed(path: &Path) -> bool {
    if !path.is_symlink() {
        return false;
    }
    match std::fs::read_link(path) {
        Ok(target) => target.to_string_lossy().contains(".git/annex/objects"),
        Err(_) => false,
    }
}

/// True if an annexed file's object-store content is locally present.
/// Regular files count as present.
pub fn is_present(path: &Path) -> bool {
    if !is_annexed(path) {
        return path.exists();
    }
    // For an annexed symlink, presence means the link resolves.
    path.canonicalize().map(|t| t.exists()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_extraction_strips_prefix_and_suffix() {
        assert_eq!(
            key_from_log_path("abc/def/SHA256E-s1234--deadbeef.mp3.log.met"),
            "SHA256E-s1234--deadbeef.mp3"
        );
        assert_eq!(key_from_log_path("KEY.log.met"), "KEY");
        assert_eq!(key_from_log_path("no-suffix"), "no-suffix");
    }

    #[test]
    fn regular_files_are_present_and_not_annexed() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("plain.mp3");
        std::fs::write(&file, b"data").unwrap();
        assert!(!is_annexed(&file));
        assert!(is_present(&file));
    }

    #[cfg(unix)]
    #[test]
    fn annex_symlink_presence_follows_target() {
        let dir = tempfile::TempDir::new().unwrap();
        let objects = dir.path().join(".git/annex/objects/xx");
        std::fs::create_dir_all(&objects).unwrap();

        let present_target = objects.join("KEY1");
        std::fs::write(&present_target, b"blob").unwrap();

        let present_link = dir.path().join("present.mp3");
        std::os::unix::fs::symlink(&present_target, &present_link).unwrap();
        assert!(is_annexed(&present_link));
        assert!(is_present(&present_link));

        let missing_link = dir.path().join("missing.mp3");
        std::os::unix::fs::symlink(objects.join("KEY2"), &missing_link).unwrap();
        assert!(is_annexed(&missing_link));
        assert!(!is_present(&missing_link));
    }
}

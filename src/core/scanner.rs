//! 本地目录扫描器
//!
//! 遍历本地根目录，应用排除规则，产出带内容哈希的文件清单。
//! 目录排除向下继承：目录被排除后其所有后代无条件排除，
//! 子目录没有「重新加入」的途径。

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// 排除规则
///
/// 三类规则：绝对目录路径、目录名通配模式、文件名通配模式。
/// 通配模式只支持 `*` 和 `?`，不是完整正则。
#[derive(Debug, Clone, Default)]
pub struct ExcludeRules {
    dirs: Vec<PathBuf>,
    dir_patterns: Vec<String>,
    file_patterns: Vec<String>,
}

impl ExcludeRules {
    pub fn new(
        dirs: Vec<String>,
        dir_patterns: Vec<String>,
        file_patterns: Vec<String>,
    ) -> Self {
        Self {
            dirs: dirs.into_iter().map(PathBuf::from).collect(),
            dir_patterns,
            file_patterns,
        }
    }

    pub fn from_job(job: &crate::db::BackupJob) -> Self {
        Self::new(
            job.exclude_dirs.clone(),
            job.exclude_dir_patterns.clone(),
            job.exclude_file_patterns.clone(),
        )
    }

    /// 目录是否被排除（自身路径命中或目录名命中模式）
    pub fn dir_excluded(&self, path: &Path) -> bool {
        if self.dirs.iter().any(|d| d.as_path() == path) {
            return true;
        }

        let name = match path.file_name() {
            Some(n) => n.to_string_lossy(),
            None => return false,
        };
        self.dir_patterns.iter().any(|p| glob_match(p, &name))
    }

    /// 文件名是否命中排除模式
    pub fn file_excluded(&self, name: &str) -> bool {
        self.file_patterns.iter().any(|p| glob_match(p, name))
    }
}

/// 简单通配匹配：`*` 匹配任意串，`?` 匹配单个字符，忽略大小写
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');

    regex::RegexBuilder::new(&re)
        .case_insensitive(true)
        .build()
        .map(|r| r.is_match(name))
        .unwrap_or(false)
}

/// 扫描到的本地文件
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub abs_path: PathBuf,
    /// 相对根目录的路径，分隔符统一为 `/`
    pub rel_path: String,
    pub hash: String,
    pub size: u64,
    pub modified_time: i64,
}

/// 本地文件扫描器
pub struct LocalFileScanner {
    rules: ExcludeRules,
}

impl LocalFileScanner {
    pub fn new(rules: ExcludeRules) -> Self {
        Self { rules }
    }

    /// 扫描根目录，返回按文件名排序的确定性文件清单
    ///
    /// 枚举和哈希之间消失或不可读的文件记一条警告后跳过，
    /// 不会中断整个扫描。
    pub async fn scan(&self, root: &Path) -> Result<Vec<LocalFile>> {
        if !root.is_dir() {
            anyhow::bail!("本地根目录不存在或不是目录: {}", root.display());
        }

        let root = root.to_path_buf();
        let rules = self.rules.clone();

        // 遍历和哈希都是阻塞 IO，放到阻塞线程池执行
        let files = tokio::task::spawn_blocking(move || walk_tree(&root, &rules)).await??;
        Ok(files)
    }
}

fn walk_tree(root: &Path, rules: &ExcludeRules) -> Result<Vec<LocalFile>> {
    // 根目录必须可枚举；枚举失败是致命错误，不能当作空目录
    std::fs::read_dir(root)
        .map_err(|e| anyhow::anyhow!("无法读取本地根目录 {}: {}", root.display(), e))?;

    let mut files = Vec::new();
    let mut excluded = 0usize;
    let mut skipped = 0usize;

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        // filter_entry 会剪掉整棵子树，排除因此向下继承
        .filter_entry(|e| {
            !(e.depth() > 0 && e.file_type().is_dir() && rules.dir_excluded(e.path()))
        });

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            // 根目录自身的枚举错误向上传播，子目录的错误只跳过该子树
            Err(e) if e.depth() == 0 => {
                return Err(anyhow::anyhow!("无法读取本地根目录: {}", e));
            }
            Err(e) => {
                warn!("遍历目录出错，跳过: {}", e);
                skipped += 1;
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if rules.file_excluded(&name) {
            excluded += 1;
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!("读取文件元数据失败，跳过: {} - {}", entry.path().display(), e);
                skipped += 1;
                continue;
            }
        };

        let data = match std::fs::read(entry.path()) {
            Ok(d) => d,
            Err(e) => {
                warn!("读取文件内容失败，跳过: {} - {}", entry.path().display(), e);
                skipped += 1;
                continue;
            }
        };

        let rel_path = match entry.path().strip_prefix(root) {
            Ok(p) => p.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };

        let modified_time = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        files.push(LocalFile {
            abs_path: entry.path().to_path_buf(),
            rel_path,
            hash: calculate_hash(&data),
            size: metadata.len(),
            modified_time,
        });
    }

    info!(
        "扫描完成: {} 个文件, {} 个被排除, {} 个跳过",
        files.len(),
        excluded,
        skipped
    );

    Ok(files)
}

/// 计算文件内容的 hash（使用 BLAKE3）
pub fn calculate_hash(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    // 只取前 16 字节（32 个十六进制字符），足够检测变化
    hash.to_hex()[..32].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*.bak", "notes.bak"));
        assert!(glob_match("*.bak", "NOTES.BAK"));
        assert!(!glob_match("*.bak", "notes.bak.txt"));
        assert!(glob_match("temp?", "temp1"));
        assert!(!glob_match("temp?", "temp10"));
        assert!(glob_match("node_modules", "node_modules"));
        assert!(!glob_match("node_modules", "node_modules2"));
        // 正则元字符按字面处理
        assert!(!glob_match("a.b", "aXb"));
    }

    #[test]
    fn test_calculate_hash() {
        let h1 = calculate_hash(b"hello");
        let h2 = calculate_hash(b"hello");
        let h3 = calculate_hash(b"world");
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
        assert_eq!(h1.len(), 32);
    }

    #[tokio::test]
    async fn test_scan_basic() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"aaa").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.txt"), b"bbb").unwrap();

        let scanner = LocalFileScanner::new(ExcludeRules::default());
        let files = scanner.scan(dir.path()).await.unwrap();

        let paths: Vec<_> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "sub/b.txt"]);
        assert_eq!(files[0].size, 3);
        assert!(!files[0].hash.is_empty());
    }

    #[tokio::test]
    async fn test_scan_excluded_dir_inherits_downward() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("tmp/keep")).unwrap();
        // keep 目录自身的名字不命中任何规则，但祖先 tmp 被排除
        fs::write(dir.path().join("tmp/keep/c.txt"), b"ccc").unwrap();
        fs::write(dir.path().join("a.txt"), b"aaa").unwrap();

        let rules = ExcludeRules::new(
            vec![dir.path().join("tmp").to_string_lossy().into_owned()],
            vec![],
            vec![],
        );
        let files = LocalFileScanner::new(rules).scan(dir.path()).await.unwrap();

        let paths: Vec<_> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt"]);
    }

    #[tokio::test]
    async fn test_scan_dir_name_pattern() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        fs::write(dir.path().join("node_modules/pkg/x.js"), b"x").unwrap();
        fs::write(dir.path().join("main.js"), b"m").unwrap();

        let rules = ExcludeRules::new(vec![], vec!["node_modules".to_string()], vec![]);
        let files = LocalFileScanner::new(rules).scan(dir.path()).await.unwrap();

        let paths: Vec<_> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["main.js"]);
    }

    #[tokio::test]
    async fn test_scan_file_pattern() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::write(dir.path().join("a.bak"), b"a").unwrap();

        let rules = ExcludeRules::new(vec![], vec![], vec!["*.bak".to_string()]);
        let files = LocalFileScanner::new(rules).scan(dir.path()).await.unwrap();

        let paths: Vec<_> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt"]);
    }

    #[tokio::test]
    async fn test_scan_missing_root() {
        let scanner = LocalFileScanner::new(ExcludeRules::default());
        let result = scanner.scan(Path::new("/no/such/dir/backuptools")).await;
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_scan_unreadable_root_is_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("locked");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("a.txt"), b"aaa").unwrap();
        fs::set_permissions(&root, fs::Permissions::from_mode(0o000)).unwrap();

        // 特权进程不受权限位约束，此时场景无法构造
        if fs::read_dir(&root).is_ok() {
            fs::set_permissions(&root, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let result = LocalFileScanner::new(ExcludeRules::default()).scan(&root).await;
        fs::set_permissions(&root, fs::Permissions::from_mode(0o755)).unwrap();

        // 不可读的根目录必须报错，空清单会被规划器解读为「全部删除」
        assert!(result.is_err());
    }
}

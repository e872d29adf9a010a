use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::{
    report::{Report, Table},
    utils::join_route,
    AuditError, Result,
};

/// Source extensions tried when resolving an import.
const EXTENSIONS: [&str; 2] = ["ts", "js"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    All,
}

impl FromStr for Method {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "get" => Self::Get,
            "post" => Self::Post,
            "put" => Self::Put,
            "patch" => Self::Patch,
            "delete" => Self::Delete,
            "all" => Self::All,
            _ => return Err(AuditError::Config(format!("unknown http method `{s}`"))),
        })
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::All => "ALL",
        })
    }
}

/// `router.use('/prefix', ident)` or `app.use(...)` in the index file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub prefix: String,
    /// Binding name, or the module path for inline `require(...)`.
    pub target: String,
    pub inline: bool,
    pub line: usize,
}

/// `router.<method>('/path', ...)` in a route file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub method: Method,
    pub path: String,
    pub line: usize,
}

/// A declaration placed under its mount prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteEntry {
    pub method: Method,
    pub full_path: String,
    pub prefix: String,
    pub file: PathBuf,
    pub line: usize,
}

impl RouteEntry {
    fn location(&self) -> String {
        format!("{}:{}", self.file.display(), self.line)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteConflict {
    pub method: Method,
    pub path: String,
    pub entries: Vec<RouteEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnresolvedMount {
    pub prefix: String,
    pub target: String,
    pub line: usize,
}

fn line_of(src: &str, offset: usize) -> usize {
    src[..offset].bytes().filter(|b| *b == b'\n').count() + 1
}

fn is_commented(src: &str, offset: usize) -> bool {
    let start = src[..offset].rfind('\n').map_or(0, |x| x + 1);
    let head = src[start..offset].trim_start();
    head.starts_with("//") || head.starts_with('*') || head.starts_with("/*")
}

/// Module path of an inline `require('./x')` argument.
fn inline_require(arg: &str) -> Option<String> {
    let start = arg.find("require(")?;
    let rest = arg[start + "require(".len()..].trim_start();
    let quote = rest.chars().next().filter(|c| matches!(c, '\'' | '"' | '`'))?;
    let rest = &rest[1..];
    rest.find(quote).map(|end| rest[..end].to_owned())
}

/// Last top-level argument of a call whose argument list continues at `from`.
///
/// Scans to the balanced `)`. Quoted strings are kept, comments dropped.
fn last_argument(src: &str, from: usize) -> Option<String> {
    let bytes = src.as_bytes();
    let (mut depth, mut arg, mut i) = (0usize, String::new(), from);
    while i < bytes.len() {
        let next = match bytes[i] {
            q @ (b'\'' | b'"' | b'`') => {
                let mut j = i + 1;
                while j < bytes.len() && bytes[j] != q {
                    j += if bytes[j] == b'\\' { 2 } else { 1 };
                }
                (j + 1).min(bytes.len())
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                i = src[i..].find('\n').map_or(bytes.len(), |x| i + x);
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = src[i + 2..].find("*/").map_or(bytes.len(), |x| i + x + 4);
                arg.push(' ');
                continue;
            }
            b'(' | b'[' | b'{' => {
                depth += 1;
                i + 1
            }
            b')' | b']' | b'}' if depth > 0 => {
                depth -= 1;
                i + 1
            }
            b')' => return Some(arg.trim().to_owned()),
            b',' if depth == 0 => {
                arg.clear();
                i += 1;
                continue;
            }
            _ => i + src[i..].chars().next().map_or(1, char::len_utf8),
        };
        arg.push_str(&src[i..next]);
        i = next;
    }
    None
}

/// Regex based extractor for Express router sources.
pub struct RouteScanner {
    mount: Regex,
    import: Regex,
    require: Regex,
    declaration: Regex,
}

impl RouteScanner {
    /// # Errors
    ///
    /// Will return `Err` when a pattern fails to compile.
    pub fn new() -> Result<Self> {
        Ok(Self {
            mount: Regex::new(r#"\b(?:router|app)\.use\(\s*['"`]([^'"`]+)['"`]\s*,"#)?,
            import: Regex::new(r#"\bimport\s+([\w$]+)\s+from\s+['"]([^'"]+)['"]"#)?,
            require: Regex::new(
                r#"\b(?:var|let|const)\s+([\w$]+)\s*=\s*(?:__importDefault\(\s*)?require\(\s*['"]([^'"]+)['"]\s*\)"#,
            )?,
            declaration: Regex::new(
                r#"\brouter\.(get|post|put|patch|delete|all)\(\s*['"`]([^'"`]+)['"`]"#,
            )?,
        })
    }

    /// Extract `router.use` and `app.use` mounts from an index file.
    #[must_use]
    pub fn mounts(&self, src: &str) -> Vec<Mount> {
        let mut ret = Vec::new();
        for cap in self.mount.captures_iter(src) {
            let Some(all) = cap.get(0) else { continue };
            if is_commented(src, all.start()) {
                continue;
            }
            // handler is the last argument, middlewares come before it
            let Some(last) = last_argument(src, all.end()) else {
                continue;
            };
            let (target, inline) = if let Some(x) = inline_require(&last) {
                (x, true)
            } else {
                let ident = last
                    .trim_end_matches(".default")
                    .trim_end_matches(r#"["default"]"#)
                    .trim_end_matches("['default']")
                    .trim();
                (ident.to_owned(), false)
            };
            if target.is_empty() {
                continue;
            }
            ret.push(Mount {
                prefix: cap[1].to_owned(),
                target,
                inline,
                line: line_of(src, all.start()),
            });
        }
        ret
    }

    /// Import bindings, name to module path.
    #[must_use]
    pub fn imports(&self, src: &str) -> HashMap<String, String> {
        self.import
            .captures_iter(src)
            .chain(self.require.captures_iter(src))
            .map(|cap| (cap[1].to_owned(), cap[2].to_owned()))
            .collect()
    }

    /// Extract route declarations of one file.
    #[must_use]
    pub fn declarations(&self, src: &str) -> Vec<Declaration> {
        let mut ret = Vec::new();
        for cap in self.declaration.captures_iter(src) {
            let Some(all) = cap.get(0) else { continue };
            if is_commented(src, all.start()) {
                continue;
            }
            let Ok(method) = cap[1].parse::<Method>() else { continue };
            ret.push(Declaration {
                method,
                path: cap[2].to_owned(),
                line: line_of(src, all.start()),
            });
        }
        ret
    }

    /// Scan `index` and the route modules it mounts.
    ///
    /// Modules are resolved relative to `dir`, defaulting to the directory of `index`.
    ///
    /// # Errors
    ///
    /// Will return `Err` when `index` cannot be read.
    pub fn scan(&self, index: &Path, dir: Option<&Path>) -> Result<RouteReport> {
        let src = fs::read_to_string(index)?;
        let dir = dir
            .map(Path::to_path_buf)
            .or_else(|| index.parent().map(Path::to_path_buf))
            .unwrap_or_default();
        let imports = self.imports(&src);
        let mounts = self.mounts(&src);
        debug!(
            index = %index.display(),
            mounts = mounts.len(),
            imports = imports.len(),
            "Router index parsed"
        );

        let mut entries = Vec::new();
        let mut unresolved = Vec::new();
        let mut mounted = BTreeSet::new();
        let mut cache: HashMap<PathBuf, Vec<Declaration>> = HashMap::new();

        let display = |p: &Path| p.strip_prefix(&dir).unwrap_or(p).to_path_buf();

        for decl in self.declarations(&src) {
            entries.push(RouteEntry {
                method: decl.method,
                full_path: join_route("", &decl.path),
                prefix: String::new(),
                file: display(index),
                line: decl.line,
            });
        }
        for m in &mounts {
            let module = if m.inline {
                Some(m.target.as_str())
            } else {
                imports.get(&m.target).map(String::as_str)
            };
            let Some(file) = module.and_then(|x| resolve_module(&dir, x)) else {
                warn!(prefix = %m.prefix, module = %m.target, "Route module not resolved");
                unresolved.push(UnresolvedMount {
                    prefix: m.prefix.clone(),
                    target: m.target.clone(),
                    line: m.line,
                });
                continue;
            };
            mounted.insert(file.clone());
            if !cache.contains_key(&file) {
                let decls = match fs::read_to_string(&file) {
                    Ok(x) => self.declarations(&x),
                    Err(e) => {
                        warn!(file = %file.display(), %e, "Route module not readable");
                        Vec::new()
                    }
                };
                cache.insert(file.clone(), decls);
            }
            for decl in cache.get(&file).into_iter().flatten() {
                entries.push(RouteEntry {
                    method: decl.method,
                    full_path: join_route(&m.prefix, &decl.path),
                    prefix: m.prefix.clone(),
                    file: display(&file),
                    line: decl.line,
                });
            }
        }

        let unmounted = route_files(&dir)
            .into_iter()
            .filter(|x| !mounted.contains(x) && x != index)
            .map(|x| display(&x))
            .collect();

        Ok(RouteReport {
            index: index.to_path_buf(),
            mounts: mounts.len(),
            routes: entries.len(),
            conflicts: find_conflicts(&entries),
            unresolved,
            unmounted,
        })
    }
}

/// Resolve an import path like `./user.routes` to a file below `dir`.
fn resolve_module(dir: &Path, module: &str) -> Option<PathBuf> {
    if !module.starts_with('.') {
        return None;
    }
    let base = dir.join(module);
    let mut candidates = vec![base.clone()];
    for ext in EXTENSIONS {
        let mut name = base.clone().into_os_string();
        name.push(format!(".{ext}"));
        candidates.push(PathBuf::from(name));
        candidates.push(base.join(format!("index.{ext}")));
    }
    if let Some(x) = candidates.into_iter().find(|x| x.is_file()) {
        return Some(x);
    }
    // compiled output may live in a sibling tree, search by file stem
    let stem = Path::new(module).file_name()?.to_string_lossy().into_owned();
    WalkDir::new(dir)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|x| x.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .find(|x| {
            x.file_stem().is_some_and(|s| s.to_string_lossy() == stem)
                && x
                    .extension()
                    .is_some_and(|e| EXTENSIONS.iter().any(|ext| e == *ext))
        })
}

/// All `*.routes.{ts,js}` files below `dir`.
fn route_files(dir: &Path) -> Vec<PathBuf> {
    let mut ret: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_entry(|x| x.file_name() != "node_modules")
        .filter_map(std::result::Result::ok)
        .filter(|x| x.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|x| {
            x.file_stem()
                .is_some_and(|s| s.to_string_lossy().ends_with(".routes"))
                && x
                    .extension()
                    .is_some_and(|e| EXTENSIONS.iter().any(|ext| e == *ext))
        })
        .collect();
    ret.sort();
    ret
}

/// Group entries by `(method, full path)` and keep groups with more than one entry.
#[must_use]
pub fn find_conflicts(entries: &[RouteEntry]) -> Vec<RouteConflict> {
    let mut groups: BTreeMap<(Method, &str), Vec<&RouteEntry>> = BTreeMap::new();
    for i in entries {
        groups.entry((i.method, i.full_path.as_str())).or_default().push(i);
    }
    groups
        .into_iter()
        .filter(|(_, v)| v.len() > 1)
        .map(|((method, path), v)| RouteConflict {
            method,
            path: path.to_owned(),
            entries: v.into_iter().cloned().collect(),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteReport {
    pub index: PathBuf,
    pub mounts: usize,
    pub routes: usize,
    pub conflicts: Vec<RouteConflict>,
    pub unresolved: Vec<UnresolvedMount>,
    /// Route files never mounted by the index.
    pub unmounted: Vec<PathBuf>,
}

impl RouteReport {
    fn conflict_table(&self) -> Table {
        let mut table = Table::new(["method", "path", "locations"]);
        for i in &self.conflicts {
            let loc: Vec<String> = i.entries.iter().map(RouteEntry::location).collect();
            table.push([i.method.to_string(), i.path.clone(), loc.join(", ")]);
        }
        table
    }
}

impl Report for RouteReport {
    fn kind(&self) -> &'static str {
        "routes"
    }

    fn findings(&self) -> usize {
        self.conflicts.len()
    }

    fn console(&self) -> String {
        let mut ret = format!(
            "Index {}: {} mounts, {} routes, {} conflicts\n",
            self.index.display(),
            self.mounts,
            self.routes,
            self.conflicts.len()
        );
        if !self.conflicts.is_empty() {
            ret.push_str(&format!("{}\n", self.conflict_table().render()));
        }
        for i in &self.unresolved {
            ret.push_str(&format!(
                "Unresolved mount `{}` -> {} (line {})\n",
                i.prefix,
                i.target,
                i.line,
            ));
        }
        for i in &self.unmounted {
            ret.push_str(&format!("Unmounted route file {}\n", i.display()));
        }
        ret
    }

    fn markdown(&self) -> String {
        let mut ret = format!(
            "# Route conflicts\n\nIndex `{}`: {} mounts, {} routes, **{}** conflicts\n\n",
            self.index.display(),
            self.mounts,
            self.routes,
            self.conflicts.len()
        );
        if !self.conflicts.is_empty() {
            ret.push_str(&self.conflict_table().markdown());
        }
        if !self.unresolved.is_empty() {
            ret.push_str("\n## Unresolved mounts\n\n");
            for i in &self.unresolved {
                ret.push_str(&format!("- `{}` -> `{}` (line {})\n", i.prefix, i.target, i.line));
            }
        }
        if !self.unmounted.is_empty() {
            ret.push_str("\n## Unmounted route files\n\n");
            for i in &self.unmounted {
                ret.push_str(&format!("- `{}`\n", i.display()));
            }
        }
        ret
    }
}

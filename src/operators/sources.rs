//! Source operators: they generate values and must come first

use crate::core::callable::{evaluate, Expr};
use crate::core::env::Environment;
use crate::core::error::OperatorError;
use crate::core::template::{LsDepth, Role};
use crate::core::value::{FileInfo, FileKind, Value};
use crate::operators::{Emitter, Flow, Operator};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Local, Timelike, Utc};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::{debug, warn};

/// Lines read per `generate` call
const READ_BATCH: usize = 64;

/// `gen`: the integers `start .. start + count`
#[derive(Debug)]
pub struct Gen {
    next: i64,
    remaining: usize,
}

impl Gen {
    pub fn new(count: usize, start: i64) -> Self {
        Self {
            next: start,
            remaining: count,
        }
    }
}

#[async_trait]
impl Operator for Gen {
    fn name(&self) -> &str {
        "gen"
    }

    fn role(&self) -> Role {
        Role::Source
    }

    async fn generate(&mut self, out: &mut Emitter) -> Result<Flow, OperatorError> {
        if self.remaining == 0 {
            return Ok(Flow::Stop);
        }
        out.emit(self.next);
        self.next = self.next.saturating_add(1);
        self.remaining -= 1;
        Ok(Flow::Continue)
    }

    async fn process(&mut self, _input: Value, _out: &mut Emitter) -> Result<Flow, OperatorError> {
        Ok(Flow::Stop)
    }
}

/// Which kinds of entry `ls` reports; all of them when nothing is selected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindFilter {
    file: bool,
    dir: bool,
    symlink: bool,
}

impl KindFilter {
    pub fn new(file: bool, dir: bool, symlink: bool) -> Self {
        if !(file || dir || symlink) {
            return Self {
                file: true,
                dir: true,
                symlink: true,
            };
        }
        Self { file, dir, symlink }
    }

    fn accepts(&self, kind: FileKind) -> bool {
        match kind {
            FileKind::File => self.file,
            FileKind::Dir => self.dir,
            FileKind::Symlink => self.symlink,
            FileKind::Other => self.file,
        }
    }
}

/// `ls`: a pre-order walk over the given paths
///
/// The walk is lazy: each `generate` visits one entry, so a downstream
/// `head` stops the traversal early.
#[derive(Debug)]
pub struct Ls {
    roots: Vec<PathBuf>,
    depth: LsDepth,
    filter: KindFilter,
    pending: Vec<(PathBuf, usize)>,
    /// Roots are listed once, as roots, even when another root's walk reaches them
    root_set: HashSet<PathBuf>,
}

impl Ls {
    pub fn new(roots: Vec<PathBuf>, depth: LsDepth, filter: KindFilter) -> Self {
        Self {
            roots,
            depth,
            filter,
            pending: Vec::new(),
            root_set: HashSet::new(),
        }
    }

    fn descends(&self, level: usize) -> bool {
        match self.depth {
            LsDepth::Entries => false,
            LsDepth::Children => level == 0,
            LsDepth::Recursive => true,
        }
    }

    async fn children(path: &PathBuf) -> std::io::Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(path).await?;
        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            children.push(entry.path());
        }
        children.sort();
        Ok(children)
    }
}

fn file_kind(metadata: &std::fs::Metadata) -> FileKind {
    let file_type = metadata.file_type();
    if file_type.is_symlink() {
        FileKind::Symlink
    } else if file_type.is_dir() {
        FileKind::Dir
    } else if file_type.is_file() {
        FileKind::File
    } else {
        FileKind::Other
    }
}

#[async_trait]
impl Operator for Ls {
    fn name(&self) -> &str {
        "ls"
    }

    fn role(&self) -> Role {
        Role::Source
    }

    async fn open(&mut self) -> Result<(), OperatorError> {
        let mut roots = std::mem::take(&mut self.roots);
        if roots.is_empty() {
            roots.push(PathBuf::from("."));
        }
        roots.sort();
        roots.dedup();
        for root in &roots {
            // Missing roots fail the node before anything flows
            fs::symlink_metadata(root).await.map_err(|e| {
                OperatorError::Io(std::io::Error::new(
                    e.kind(),
                    format!("{}: {}", root.display(), e),
                ))
            })?;
        }
        self.root_set = roots.iter().cloned().collect();
        self.pending = roots.into_iter().rev().map(|root| (root, 0)).collect();
        Ok(())
    }

    async fn generate(&mut self, out: &mut Emitter) -> Result<Flow, OperatorError> {
        let Some((path, level)) = self.pending.pop() else {
            return Ok(Flow::Stop);
        };
        if level > 0 && self.root_set.contains(&path) {
            return Ok(Flow::Continue);
        }

        let metadata = match fs::symlink_metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("ls: skipping {}: {}", path.display(), e);
                return Ok(Flow::Continue);
            }
        };
        let kind = file_kind(&metadata);

        if self.filter.accepts(kind) {
            out.emit(FileInfo {
                path: path.clone(),
                kind,
                size: metadata.len(),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }

        // A symlinked root is followed; deeper symlinks are not
        let is_dir = match kind {
            FileKind::Dir => true,
            FileKind::Symlink if level == 0 => fs::metadata(&path)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false),
            _ => false,
        };

        if is_dir && self.descends(level) {
            match Self::children(&path).await {
                Ok(children) => {
                    self.pending
                        .extend(children.into_iter().rev().map(|child| (child, level + 1)));
                }
                Err(e) => warn!("ls: cannot read {}: {}", path.display(), e),
            }
        }

        Ok(Flow::Continue)
    }

    async fn process(&mut self, _input: Value, _out: &mut Emitter) -> Result<Flow, OperatorError> {
        Ok(Flow::Stop)
    }
}

/// `read`: the lines of a text file, without line terminators
#[derive(Debug)]
pub struct Read {
    path: PathBuf,
    lines: Option<Lines<BufReader<fs::File>>>,
}

impl Read {
    pub fn new(path: PathBuf) -> Self {
        Self { path, lines: None }
    }
}

#[async_trait]
impl Operator for Read {
    fn name(&self) -> &str {
        "read"
    }

    fn role(&self) -> Role {
        Role::Source
    }

    async fn open(&mut self) -> Result<(), OperatorError> {
        let file = fs::File::open(&self.path).await.map_err(|e| {
            OperatorError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", self.path.display(), e),
            ))
        })?;
        debug!("read: opened {}", self.path.display());
        self.lines = Some(BufReader::new(file).lines());
        Ok(())
    }

    async fn generate(&mut self, out: &mut Emitter) -> Result<Flow, OperatorError> {
        let Some(lines) = self.lines.as_mut() else {
            return Ok(Flow::Stop);
        };
        for _ in 0..READ_BATCH {
            match lines.next_line().await? {
                Some(line) => out.emit(line),
                None => return Ok(Flow::Stop),
            }
        }
        Ok(Flow::Continue)
    }

    async fn process(&mut self, _input: Value, _out: &mut Emitter) -> Result<Flow, OperatorError> {
        Ok(Flow::Stop)
    }

    async fn close(&mut self) {
        self.lines = None;
    }
}

/// Parse an `[[HH:]MM:]SS` interval
pub fn parse_interval(text: &str) -> Result<Duration, OperatorError> {
    let bad = || OperatorError::invalid(format!("bad interval format: '{}'", text));

    let parts: Vec<&str> = text.trim().split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(bad());
    }
    let mut seconds: u64 = 0;
    for part in parts {
        let n: u64 = part.trim().parse().map_err(|_| bad())?;
        seconds = seconds.checked_mul(60).and_then(|s| s.checked_add(n)).ok_or_else(bad)?;
    }
    if seconds == 0 {
        return Err(OperatorError::invalid("timer interval must be positive"));
    }
    Ok(Duration::from_secs(seconds))
}

/// `timer`: one timestamp per interval, starting immediately
#[derive(Debug)]
pub struct Timer {
    period: Duration,
    limit: Option<usize>,
    components: bool,
    ticker: Option<tokio::time::Interval>,
    ticks: usize,
}

impl Timer {
    pub fn new(period: Duration, limit: Option<usize>, components: bool) -> Self {
        Self {
            period,
            limit,
            components,
            ticker: None,
            ticks: 0,
        }
    }

    fn timestamp(&self) -> Value {
        if self.components {
            let now = Local::now();
            Value::record([
                Value::Int(now.year() as i64),
                Value::Int(now.month() as i64),
                Value::Int(now.day() as i64),
                Value::Int(now.hour() as i64),
                Value::Int(now.minute() as i64),
                Value::Int(now.second() as i64),
                Value::Int(now.weekday().num_days_from_monday() as i64),
                Value::Int(now.ordinal() as i64),
            ])
        } else {
            Value::Float(Utc::now().timestamp_millis() as f64 / 1000.0)
        }
    }
}

#[async_trait]
impl Operator for Timer {
    fn name(&self) -> &str {
        "timer"
    }

    fn role(&self) -> Role {
        Role::Source
    }

    async fn open(&mut self) -> Result<(), OperatorError> {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
        Ok(())
    }

    async fn generate(&mut self, out: &mut Emitter) -> Result<Flow, OperatorError> {
        if self.limit.map_or(false, |limit| self.ticks >= limit) {
            return Ok(Flow::Stop);
        }
        let Some(ticker) = self.ticker.as_mut() else {
            return Ok(Flow::Stop);
        };
        ticker.tick().await;
        self.ticks += 1;
        out.emit(self.timestamp());
        Ok(Flow::Continue)
    }

    async fn process(&mut self, _input: Value, _out: &mut Emitter) -> Result<Flow, OperatorError> {
        Ok(Flow::Stop)
    }

    async fn close(&mut self) {
        self.ticker = None;
    }
}

/// `project`: the single value of an expression
pub struct Project {
    expr: Expr,
    env: Arc<dyn Environment>,
    done: bool,
}

impl Project {
    pub fn new(expr: Expr, env: Arc<dyn Environment>) -> Self {
        Self {
            expr,
            env,
            done: false,
        }
    }
}

#[async_trait]
impl Operator for Project {
    fn name(&self) -> &str {
        "project"
    }

    fn role(&self) -> Role {
        Role::Source
    }

    async fn generate(&mut self, out: &mut Emitter) -> Result<Flow, OperatorError> {
        if !self.done {
            self.done = true;
            out.emit(evaluate(&self.expr, &[], self.env.as_ref())?);
        }
        Ok(Flow::Stop)
    }

    async fn process(&mut self, _input: Value, _out: &mut Emitter) -> Result<Flow, OperatorError> {
        Ok(Flow::Stop)
    }
}

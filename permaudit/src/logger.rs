use std::{
    fmt::Write as _,
    io::{self, Write, stderr, stdout},
    path::PathBuf,
    str::FromStr,
    sync::mpsc::{self, Receiver, Sender},
    thread,
};

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use colored::{Color, Colorize};
use derivative::Derivative;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::Level;

#[derive(Serialize, Debug)]
pub struct LogItem {
    pub time: Value,
    pub level: String,
    pub message: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub target: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub filename: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub line_number: i64,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_zero(x: &i64) -> bool {
    *x == 0
}

impl LogItem {
    fn take_str(mp: &Map<String, Value>, key: &str) -> Option<String> {
        mp.get(key).and_then(Value::as_str).map(ToOwned::to_owned)
    }

    #[must_use]
    pub fn from_json(mut s: Map<String, Value>) -> Self {
        let mut fields = if let Value::Object(x) = s.remove("fields").unwrap_or_default() {
            x
        } else {
            Map::default()
        };
        let message = fields
            .remove("message")
            .and_then(|x| x.as_str().map(ToOwned::to_owned))
            .unwrap_or_default();
        Self {
            time: Value::default(),
            level: Self::take_str(&s, "level").unwrap_or_else(|| "ERROR".to_owned()),
            message,
            target: Self::take_str(&s, "target").unwrap_or_default(),
            fields,
            filename: Self::take_str(&s, "filename").unwrap_or_default(),
            line_number: s
                .get("line_number")
                .and_then(Value::as_i64)
                .unwrap_or_default(),
        }
    }

    /// # Errors
    ///
    /// Will raise `Err` for write errors.
    pub fn write_json<T: Write>(&self, mut writer: T) -> Result<()> {
        let v = serde_json::to_string(self)?;
        writer.write_fmt(format_args!("{v}\n")).map_err(Into::into)
    }

    /// # Errors
    ///
    /// Will raise `Err` for write errors.
    pub fn write_console<T: Write>(&self, mut writer: T) -> Result<()> {
        let mut buf = String::new();
        write!(
            buf,
            "{} {} ",
            self.time.as_str().unwrap_or_default().bright_black(),
            self.level
        )?;
        if !self.target.is_empty() {
            write!(buf, "{}", self.target.bright_black())?;
        }
        if !self.filename.is_empty() {
            buf += &format!("({}:{})", self.filename, self.line_number)
                .bright_black()
                .to_string();
        }
        write!(buf, "{} {}", ":".bright_black(), self.message)?;
        for (k, v) in &self.fields {
            let v = v.as_str().map_or_else(|| v.to_string(), ToOwned::to_owned);
            buf += &format!(" {k}={v}").bright_black().to_string();
        }
        writer.write_fmt(format_args!("{buf}\n")).map_err(Into::into)
    }
}

pub struct LogSender {
    pub tx: Sender<Map<String, Value>>,
}

impl io::Write for LogSender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(serde_json::from_slice(buf)?)
            .or(Err(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // no buffering
        Ok(())
    }
}

impl LogSender {
    pub fn new(tx: Sender<Map<String, Value>>) -> impl Fn() -> Self {
        move || Self { tx: tx.clone() }
    }
}

#[derive(Derivative)]
#[derivative(Default(new = "true"))]
pub struct Logger {
    pub verbose: bool,
    pub json: bool,
    pub enable: bool,

    tx: Option<Sender<Map<String, Value>>>,
    ack: Option<Receiver<()>>,
}

/// Marker asking the printing thread to acknowledge everything before it.
const FLUSH_KEY: &str = "__flush";

impl Logger {
    /// Keep the path from the last `src` on.
    ///
    /// # Examples
    ///
    /// - /root/<u>permaudit_api/src/crawl.rs</u> => permaudit_api/src/crawl.rs
    #[must_use]
    pub fn trim_filename(s: &str) -> String {
        let mut buf = Vec::new();
        let mut flag = false;
        let s = PathBuf::from(s);
        for i in s.iter().rev() {
            buf.push(i);
            if flag {
                break;
            }
            if i.eq_ignore_ascii_case("src") {
                flag = true;
            }
        }
        let mut ret = PathBuf::new();
        for i in buf.into_iter().rev() {
            ret.push(i);
        }
        ret.to_string_lossy().into()
    }

    /// Keep the crate part of a target, library targets are renamed.
    #[must_use]
    pub fn trim_target(s: &str) -> String {
        if s.starts_with("sea_orm") || s.starts_with("sqlx") {
            String::from("permaudit-db")
        } else if s.starts_with("reqwest") || s.starts_with("hyper") {
            String::from("permaudit-http")
        } else {
            s.split("::").next().unwrap_or("unknown").to_owned()
        }
    }

    /// Colored, right aligned `level`.
    #[must_use]
    pub fn fmt_level(level: &Level) -> String {
        format!("{: >5}", level.to_string())
            .bold()
            .color(match *level {
                Level::TRACE | Level::DEBUG => Color::Magenta,
                Level::INFO => Color::Green,
                Level::WARN => Color::Yellow,
                Level::ERROR => Color::Red,
            })
            .to_string()
    }

    fn is_ignore(target: &str, level: Level) -> bool {
        // connection pool and tls chatter
        (target.starts_with("hyper") || target.starts_with("rustls") || target.starts_with("h2"))
            && level > Level::INFO
    }

    fn render(item: &mut LogItem, level: Level, json: bool, verbose: bool) {
        item.target = Self::trim_target(&item.target);
        item.filename = Self::trim_filename(&item.filename);
        if !verbose {
            item.filename.clear();
            item.line_number = 0;
        }
        let writer: Box<dyn io::Write> = if level <= Level::WARN {
            Box::new(stderr())
        } else {
            Box::new(stdout())
        };
        if json {
            item.time = Utc::now().timestamp_micros().into();
            let _ = item.write_json(writer);
        } else {
            item.time = DateTime::<Local>::from(Utc::now())
                .format("%F %T%.3f")
                .to_string()
                .into();
            item.level = Self::fmt_level(&level);
            let _ = item.write_console(writer);
        }
    }

    /// Install the global subscriber and start the printing thread.
    ///
    /// # Errors
    ///
    /// Will return `Err` when a global subscriber is already set.
    pub fn start(&mut self, enable: bool, json: bool, verbose: bool) -> Result<()> {
        self.enable = enable;
        self.json = json;
        self.verbose = verbose;
        if !enable {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel::<Map<String, Value>>();
        let (ack_tx, ack_rx) = mpsc::sync_channel(1);
        tracing_subscriber::fmt()
            .with_max_level(if verbose { Level::DEBUG } else { Level::INFO })
            .with_writer(LogSender::new(tx.clone()))
            .without_time()
            .with_file(true)
            .with_line_number(true)
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!(e))?;

        self.tx = Some(tx);
        self.ack = Some(ack_rx);
        thread::spawn(move || {
            while let Ok(v) = rx.recv() {
                if v.contains_key(FLUSH_KEY) {
                    let _ = ack_tx.send(());
                    continue;
                }
                let mut item = LogItem::from_json(v);
                let level = Level::from_str(&item.level).unwrap_or(Level::ERROR);
                if Self::is_ignore(&item.target, level) {
                    continue;
                }
                Self::render(&mut item, level, json, verbose);
            }
        });
        Ok(())
    }

    /// Block until every record logged so far is printed.
    pub fn flush(&self) {
        if let (Some(tx), Some(ack)) = (&self.tx, &self.ack) {
            let mut mp = Map::new();
            mp.insert(FLUSH_KEY.to_owned(), Value::Bool(true));
            if tx.send(mp).is_ok() {
                let _ = ack.recv();
            }
        }
    }
}

//! Diagnostic console for isolation events

use std::collections::{BTreeMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::navigation::OriginAgentClusterEndResult;
use crate::origin::Origin;

/// Log level for console messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

impl LogLevel {
    /// Get the display string for the log level
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// A console message
#[derive(Debug, Clone)]
pub struct ConsoleMessage {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: u64,
    /// Origin of the document the message is about
    pub origin: Option<Origin>,
    pub end_result: Option<OriginAgentClusterEndResult>,
}

impl ConsoleMessage {
    /// Create a new console message
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            level,
            message: message.into(),
            timestamp,
            origin: None,
            end_result: None,
        }
    }

    pub fn with_origin(mut self, origin: &Origin) -> Self {
        self.origin = Some(origin.clone());
        self
    }

    pub fn with_end_result(mut self, end_result: OriginAgentClusterEndResult) -> Self {
        self.end_result = Some(end_result);
        self
    }
}

const MAX_MESSAGES: usize = 1000;

/// Diagnostic console plus Origin-Agent-Cluster counters.
///
/// Keeps the most recent messages only.
pub struct Console {
    messages: VecDeque<ConsoleMessage>,
    end_results: BTreeMap<OriginAgentClusterEndResult, u64>,
}

impl Console {
    /// Create a new console
    pub fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            end_results: BTreeMap::new(),
        }
    }

    /// Log an error message
    pub fn error(&mut self, message: impl Into<String>) {
        self.add_message(ConsoleMessage::new(LogLevel::Error, message));
    }

    /// Report how an Origin-Agent-Cluster evaluation ended. Denied
    /// requests are surfaced as warnings.
    pub fn record_origin_agent_cluster(&mut self, origin: &Origin, end_result: OriginAgentClusterEndResult) {
        *self.end_results.entry(end_result).or_insert(0) += 1;

        let message = match end_result {
            OriginAgentClusterEndResult::RequestedButNotOriginKeyed => ConsoleMessage::new(
                LogLevel::Warn,
                format!(
                    "The page requested an origin-keyed agent cluster using the Origin-Agent-Cluster header, \
                     but could not be origin-keyed since the origin '{}' had previously been placed in a \
                     site-keyed agent cluster.",
                    origin
                ),
            ),
            OriginAgentClusterEndResult::RequestedAndOriginKeyed => {
                ConsoleMessage::new(LogLevel::Info, format!("{} is origin-keyed on request", origin))
            }
            OriginAgentClusterEndResult::NotRequestedButOriginKeyed => {
                ConsoleMessage::new(LogLevel::Debug, format!("{} is origin-keyed by default", origin))
            }
            OriginAgentClusterEndResult::NotRequestedAndNotOriginKeyed => return,
        };
        self.add_message(message.with_origin(origin).with_end_result(end_result));
    }

    /// Add a message to the console
    fn add_message(&mut self, message: ConsoleMessage) {
        if self.messages.len() >= MAX_MESSAGES {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
    }

    /// Clear messages and counters
    pub fn clear(&mut self) {
        self.messages.clear();
        self.end_results.clear();
    }

    /// Get all messages
    pub fn messages(&self) -> impl Iterator<Item = &ConsoleMessage> {
        self.messages.iter()
    }

    /// Get message count
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// How often an end result has been recorded
    pub fn end_result_count(&self, end_result: OriginAgentClusterEndResult) -> u64 {
        self.end_results.get(&end_result).copied().unwrap_or(0)
    }

    /// All end result counters, zeros included
    pub fn end_result_counts(&self) -> Vec<(OriginAgentClusterEndResult, u64)> {
        OriginAgentClusterEndResult::ALL
            .iter()
            .map(|result| (*result, self.end_result_count(*result)))
            .collect()
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

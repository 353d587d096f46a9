//! The client orchestrator.
//!
//! A [`Session`] is one interaction sequence against the memory network:
//! credential gate on construction, `tools/list` before the first tool call,
//! intent classification, confirmation for destructive operations, a count
//! query for listings, and per-item batches for multi-key requests.

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::batch::{self, BatchItem, BatchReport, ItemOutcome, MIN_BATCH_SIZE};
use crate::config::{EnsueConfig, SessionConfig};
use crate::confirm::{ConfirmationGate, ConfirmationToken, ConfirmedAction, Decision, Proposal};
use crate::credential;
use crate::error::{EnsueError, Result};
use crate::intent::{self, tool, Intent, Operation};
use crate::listing::{self, Page, PageRequest};
use crate::rpc::{Retry, RpcClient, ToolOutput};
use crate::tools::{self, arg, ToolCatalog};

const SUMMARY_LIMIT: usize = 4000;
const DESCRIPTION_LIMIT: usize = 80;
const CAPTURE_NAMESPACE: &str = "sessions";

const CLARIFY_UNMATCHED: &str = "I couldn't tell which memory operation you want. \
     Should I remember, recall, search, update, delete, list, share, revoke access, \
     show permissions, or subscribe?";

/// Outcome of one step of the conversation.
#[derive(Debug)]
pub enum Reply {
    /// A single remote call completed.
    Done { tool: String, summary: String, output: Option<Value> },
    /// Nothing was called; the user needs to say more.
    Clarify(String),
    /// A destructive action waits for an explicit yes.
    ConfirmationRequired(Proposal),
    /// The user declined; no remote call was made.
    Cancelled(Proposal),
    /// Count query result for a listing.
    Count { total: Option<u64>, message: String },
    Page(Page),
    Batch(BatchReport),
    /// Auto-capture skipped because read-only mode is on.
    Suppressed,
}

impl Reply {
    /// Human-readable rendering.
    pub fn message(&self) -> String {
        match self {
            Self::Done { tool, summary, .. } => format!("{tool}: {summary}"),
            Self::Clarify(question) => question.clone(),
            Self::ConfirmationRequired(proposal) => proposal.prompt(),
            Self::Cancelled(proposal) => format!(
                "Cancelled. Nothing was changed for {}.",
                proposal.identifiers.join(", ")
            ),
            Self::Count { message, .. } => message.clone(),
            Self::Page(page) => {
                let mut out = format!(
                    "Page {} ({} per page){}:\n",
                    page.request.page + 1,
                    page.request.page_size,
                    page.total.map(|t| format!(" of {t} total")).unwrap_or_default()
                );
                for key in &page.keys {
                    out.push_str(&format!("  {key}\n"));
                }
                if page.has_more() {
                    out.push_str("More available; ask for the next page.");
                }
                out
            }
            Self::Batch(report) => report.summary(),
            Self::Suppressed => "Read-only mode is on; automatic capture skipped.".into(),
        }
    }
}

pub struct Session {
    client: RpcClient,
    catalog: Option<ToolCatalog>,
    discovery_error: Option<String>,
    gate: ConfirmationGate,
    settings: SessionConfig,
}

impl Session {
    /// Open a session. Fails with [`EnsueError::MissingCredential`] before any
    /// network activity when no credential is configured.
    pub fn start(config: &EnsueConfig) -> Result<Self> {
        let credential = credential::require(config.credential.as_ref())?.clone();
        let client = RpcClient::new(config, credential)?;
        info!(url = %client.url(), read_only = config.session.read_only, "session started");
        Ok(Self {
            client,
            catalog: None,
            discovery_error: None,
            gate: ConfirmationGate::default(),
            settings: config.session.clone(),
        })
    }

    pub fn tools(&self) -> Option<&ToolCatalog> {
        self.catalog.as_ref()
    }

    pub fn read_only(&self) -> bool {
        self.settings.read_only
    }

    pub fn pending_confirmation(&self) -> Option<&Proposal> {
        self.gate.pending()
    }

    /// Fetch the tool list, replacing whatever this session had.
    pub async fn refresh_tools(&mut self) -> Result<&ToolCatalog> {
        match self.client.list_tools().await {
            Ok(tools) => {
                info!(count = tools.len(), "tools discovered");
                self.discovery_error = None;
                Ok(self.catalog.insert(ToolCatalog::new(tools)))
            }
            Err(e) => {
                warn!(error = %e, "tool discovery failed");
                let message = e.to_string();
                self.catalog = None;
                self.discovery_error = Some(message.clone());
                Err(EnsueError::Discovery(message))
            }
        }
    }

    /// Discover once per session before the first call. A failed discovery
    /// blocks every later operation until [`Session::refresh_tools`] succeeds.
    async fn ensure_discovered(&mut self) -> Result<()> {
        if self.catalog.is_some() {
            return Ok(());
        }
        if let Some(message) = &self.discovery_error {
            return Err(EnsueError::Discovery(message.clone()));
        }
        self.refresh_tools().await.map(|_| ())
    }

    /// Handle one natural-language request.
    pub async fn handle(&mut self, utterance: &str) -> Result<Reply> {
        self.ensure_discovered().await?;

        let Some(intent) = intent::classify(utterance) else {
            debug!("no intent matched");
            return Ok(Reply::Clarify(CLARIFY_UNMATCHED.into()));
        };

        info!(operation = %intent.operation, "handling request");

        match intent.operation {
            Operation::Create => self.create(&intent).await,
            Operation::Get => self.get(&intent).await,
            Operation::Search => match intent.text.as_deref() {
                Some(query) => self.search(query).await,
                None => Ok(Reply::Clarify("What should I search for?".into())),
            },
            Operation::Update => self.update(&intent).await,
            Operation::Delete => Ok(self.propose(&intent)),
            Operation::ListKeys => {
                let prefix = intent.keys.first().map(String::as_str);
                match intent.text.as_deref() {
                    Some(topic) => self.topic(prefix, topic).await,
                    None => self.count(prefix).await,
                }
            }
            Operation::Share => self.share(&intent).await,
            Operation::Revoke => Ok(self.propose(&intent)),
            Operation::ListPermissions => {
                let mut args = Map::new();
                if let Some(key) = intent.keys.first() {
                    args.insert(arg::KEY.into(), Value::from(key.as_str()));
                }
                self.single(tool::LIST_PERMISSIONS, args).await
            }
            Operation::Subscribe => self.keyed(tool::SUBSCRIBE_TO_MEMORY, &intent, "subscribe to").await,
        }
    }

    async fn create(&mut self, intent: &Intent) -> Result<Reply> {
        let items = intent.create_items();
        if intent.keys.is_empty() && items.len() >= MIN_BATCH_SIZE {
            let entries = items
                .iter()
                .map(|value| BatchItem {
                    label: intent::derive_key(value),
                    tool: tool::CREATE_MEMORY.into(),
                    arguments: create_arguments(&intent::derive_key(value), value),
                })
                .collect();
            return self.run_batch(entries, |_| {}).await.map(Reply::Batch);
        }

        let (Some(key), Some(value)) = (intent.create_key(), intent.text.as_deref()) else {
            return Ok(Reply::Clarify("What should I remember?".into()));
        };
        self.single(tool::CREATE_MEMORY, create_arguments(&key, value)).await
    }

    async fn get(&mut self, intent: &Intent) -> Result<Reply> {
        match intent.keys.as_slice() {
            [] => match intent.text.as_deref() {
                Some(query) => self.search(query).await,
                None => Ok(Reply::Clarify("Which memory should I recall?".into())),
            },
            [key] => self.single(tool::GET_MEMORY, key_arguments(key)).await,
            keys => self.keyed_batch(tool::GET_MEMORY, keys).await,
        }
    }

    async fn search(&mut self, query: &str) -> Result<Reply> {
        let Some(name) = self
            .catalog()?
            .first_available(&[tool::DISCOVER_MEMORIES, tool::SEARCH_MEMORIES])
            .map(|t| t.name.clone())
        else {
            return Err(EnsueError::UnknownTool(tool::DISCOVER_MEMORIES.into()));
        };
        let mut args = Map::new();
        args.insert(arg::QUERY.into(), Value::from(query));
        args.insert(arg::LIMIT.into(), Value::from(self.settings.search_limit.min(listing::MAX_PAGE_SIZE)));
        let output = self.call_bounded(&name, &args).await?;
        Ok(done(&name, output))
    }

    async fn update(&mut self, intent: &Intent) -> Result<Reply> {
        let Some(key) = intent.keys.first() else {
            return Ok(Reply::Clarify("Which key should I update? Keys look like `category/name`.".into()));
        };
        let Some(value) = intent.text.as_deref() else {
            return Ok(Reply::Clarify(format!("What should `{key}` say now?")));
        };
        let mut args = key_arguments(key);
        args.insert(arg::VALUE.into(), Value::from(value));
        self.single(tool::UPDATE_MEMORY, args).await
    }

    async fn share(&mut self, intent: &Intent) -> Result<Reply> {
        let Some(key) = intent.keys.first() else {
            return Ok(Reply::Clarify("Which key should I share?".into()));
        };
        let Some(user) = intent.user.as_deref() else {
            return Ok(Reply::Clarify(format!("Who should get access to `{key}`?")));
        };
        let mut args = key_arguments(key);
        args.insert(arg::USER.into(), Value::from(user));
        self.single(tool::SHARE, args).await
    }

    async fn keyed(&mut self, tool_name: &str, intent: &Intent, verb: &str) -> Result<Reply> {
        match intent.keys.as_slice() {
            [] => Ok(Reply::Clarify(format!(
                "Which key should I {verb}? Keys look like `category/name`."
            ))),
            [key] => self.single(tool_name, key_arguments(key)).await,
            keys => self.keyed_batch(tool_name, keys).await,
        }
    }

    async fn keyed_batch(&mut self, tool_name: &str, keys: &[String]) -> Result<Reply> {
        let items = keys
            .iter()
            .map(|key| BatchItem {
                label: key.clone(),
                tool: tool_name.into(),
                arguments: key_arguments(key),
            })
            .collect();
        self.run_batch(items, |_| {}).await.map(Reply::Batch)
    }

    fn propose(&mut self, intent: &Intent) -> Reply {
        if intent.keys.is_empty() {
            let verb = match intent.operation {
                Operation::Revoke => "revoke access to",
                _ => "delete",
            };
            return Reply::Clarify(format!("Which key should I {verb}? Keys look like `category/name`."));
        }
        if intent.operation == Operation::Revoke && intent.user.is_none() {
            return Reply::Clarify(format!(
                "Whose access to {} should I revoke?",
                intent.keys.join(", ")
            ));
        }
        Reply::ConfirmationRequired(self.gate.propose(
            intent.operation,
            intent.keys.clone(),
            intent.user.clone(),
        ))
    }

    /// Answer the pending confirmation. Only an explicit affirmative runs the
    /// action; anything else cancels it with no remote call.
    pub async fn confirm(&mut self, token: &ConfirmationToken, answer: &str) -> Result<Reply> {
        match self.gate.respond(token, answer)? {
            Decision::Confirmed(action) => self.execute_confirmed(action).await,
            Decision::Cancelled(proposal) => Ok(Reply::Cancelled(proposal)),
        }
    }

    /// [`Session::confirm`] against whatever is pending.
    pub async fn answer_pending(&mut self, answer: &str) -> Result<Reply> {
        let token = self
            .gate
            .pending()
            .map(|p| p.token.clone())
            .ok_or_else(|| EnsueError::Confirmation("nothing is awaiting confirmation".into()))?;
        self.confirm(&token, answer).await
    }

    async fn execute_confirmed(&mut self, action: ConfirmedAction) -> Result<Reply> {
        let proposal = action.proposal();
        let tool_name = match proposal.operation {
            Operation::Revoke => tool::REVOKE_SHARE,
            _ => tool::DELETE_MEMORY,
        };

        let mut args = Map::new();
        let keys = &proposal.identifiers;
        args.insert(
            arg::KEY.into(),
            match keys.as_slice() {
                [single] => Value::from(single.as_str()),
                many => Value::from(many.to_vec()),
            },
        );
        if let Some(user) = &proposal.user {
            args.insert(arg::USER.into(), Value::from(user.as_str()));
        }

        let descriptor = self.catalog()?.get(tool_name)?;
        let reply = match descriptor.shape_arguments(&args) {
            Ok(shaped) => {
                info!(tool = tool_name, count = keys.len(), "executing confirmed action");
                let output = self.client.call_tool(tool_name, shaped, Retry::Never).await?;
                done(tool_name, output)
            }
            // The schema takes one key per call: the confirmed batch runs item by item.
            Err(EnsueError::InvalidArguments { .. }) if keys.len() > 1 => {
                let items = keys
                    .iter()
                    .map(|key| {
                        let mut arguments = key_arguments(key);
                        if let Some(user) = &proposal.user {
                            arguments.insert(arg::USER.into(), Value::from(user.as_str()));
                        }
                        BatchItem {
                            label: key.clone(),
                            tool: tool_name.into(),
                            arguments,
                        }
                    })
                    .collect();
                Reply::Batch(self.execute_items(items, |_| {}).await?)
            }
            Err(e) => return Err(e),
        };

        self.gate.mark_executed(action);
        Ok(reply)
    }

    /// Count-first listing: one `limit: 1` query, then ask what the user wants.
    pub async fn count(&mut self, prefix: Option<&str>) -> Result<Reply> {
        self.ensure_discovered().await?;
        let total = self.total(prefix).await?;
        Ok(Reply::Count {
            total,
            message: listing::count_message(total, prefix),
        })
    }

    /// "Show memories about X": count first, then semantic search for the
    /// topic instead of enumerating keys.
    pub async fn topic(&mut self, prefix: Option<&str>, topic: &str) -> Result<Reply> {
        self.ensure_discovered().await?;
        let total = self.total(prefix).await?;
        match self.search(topic).await? {
            Reply::Done { tool, summary, output } => Ok(Reply::Done {
                tool,
                summary: format!("{}\n{summary}", listing::topic_message(total, topic)),
                output,
            }),
            other => Ok(other),
        }
    }

    async fn total(&self, prefix: Option<&str>) -> Result<Option<u64>> {
        let output = self
            .call_bounded(tool::LIST_KEYS, &listing::count_arguments(prefix))
            .await?;
        let total = output.json.as_ref().and_then(listing::extract_total);
        info!(total = ?total, "count query finished");
        Ok(total)
    }

    /// Explicit browsing, one small page at a time.
    pub async fn browse(&mut self, request: PageRequest) -> Result<Reply> {
        self.ensure_discovered().await?;
        let output = self.call_bounded(tool::LIST_KEYS, &request.arguments()).await?;
        Ok(Reply::Page(Page::from_response(request, output.json.as_ref())))
    }

    /// Automatic capture of session activity. Suppressed in read-only mode;
    /// manual operations are unaffected.
    pub async fn capture(&mut self, text: &str) -> Result<Reply> {
        if self.settings.read_only {
            debug!("read-only mode: auto-capture suppressed");
            return Ok(Reply::Suppressed);
        }
        self.ensure_discovered().await?;
        let key = format!(
            "{CAPTURE_NAMESPACE}/{}/{}",
            chrono::Utc::now().format("%Y-%m-%d"),
            uuid::Uuid::now_v7()
        );
        self.single(tool::CREATE_MEMORY, create_arguments(&key, text)).await
    }

    /// Call a tool by name with explicit arguments. Destructive tools go
    /// through the confirmation gate like any other destructive request.
    pub async fn call_raw(&mut self, tool_name: &str, arguments: Map<String, Value>) -> Result<Reply> {
        self.ensure_discovered().await?;
        if let Some(operation) = destructive_operation(tool_name) {
            let keys = identifiers_in(&arguments);
            if keys.is_empty() {
                return Err(EnsueError::InvalidArguments {
                    tool: tool_name.into(),
                    reason: "name the key(s) to act on".into(),
                });
            }
            let user = tools::lookup(&arguments, arg::USER)
                .and_then(Value::as_str)
                .map(str::to_string);
            if operation == Operation::Revoke && user.is_none() {
                return Err(EnsueError::InvalidArguments {
                    tool: tool_name.into(),
                    reason: "name the user whose access should be revoked".into(),
                });
            }
            return Ok(Reply::ConfirmationRequired(self.gate.propose(operation, keys, user)));
        }
        self.single(tool_name, arguments).await
    }

    /// Run homogeneous non-destructive calls with per-item reporting.
    pub async fn run_batch(
        &mut self,
        items: Vec<BatchItem>,
        observer: impl FnMut(&ItemOutcome),
    ) -> Result<BatchReport> {
        self.ensure_discovered().await?;
        if let Some(item) = items.iter().find(|i| destructive_operation(&i.tool).is_some()) {
            return Err(EnsueError::Confirmation(format!(
                "`{}` is destructive and needs confirmation; it cannot run unattended in a batch",
                item.tool
            )));
        }
        self.execute_items(items, observer).await
    }

    async fn execute_items(
        &self,
        items: Vec<BatchItem>,
        observer: impl FnMut(&ItemOutcome),
    ) -> Result<BatchReport> {
        info!(count = items.len(), "running batch");
        Ok(batch::execute(
            items,
            |item| async move {
                let retry = retry_for(&item.tool);
                self.call(&item.tool, &item.arguments, retry).await
            },
            observer,
        )
        .await)
    }

    async fn single(&mut self, tool_name: &str, args: Map<String, Value>) -> Result<Reply> {
        let output = self.call(tool_name, &args, Retry::Transient).await?;
        Ok(done(tool_name, output))
    }

    fn catalog(&self) -> Result<&ToolCatalog> {
        self.catalog.as_ref().ok_or(EnsueError::DiscoveryRequired)
    }

    /// Every `tools/call` goes through here; it requires a discovered catalog.
    async fn call(&self, tool_name: &str, canonical: &Map<String, Value>, retry: Retry) -> Result<ToolOutput> {
        let descriptor = self.catalog()?.get(tool_name)?;
        let shaped = descriptor.shape_arguments(canonical)?;
        info!(tool = tool_name, "calling tool");
        self.client.call_tool(tool_name, shaped, retry).await
    }

    /// Listing and search calls: refused unless the schema carries a limit.
    async fn call_bounded(&self, tool_name: &str, canonical: &Map<String, Value>) -> Result<ToolOutput> {
        let descriptor = self.catalog()?.get(tool_name)?;
        let shaped = descriptor.shape_bounded(canonical)?;
        info!(tool = tool_name, "calling tool");
        self.client.call_tool(tool_name, shaped, Retry::Transient).await
    }
}

fn done(tool_name: &str, output: ToolOutput) -> Reply {
    Reply::Done {
        tool: tool_name.to_string(),
        summary: summarize(&output),
        output: output.json,
    }
}

fn summarize(output: &ToolOutput) -> String {
    let text = match &output.json {
        Some(json) => serde_json::to_string_pretty(json).unwrap_or_else(|_| output.text.clone()),
        None => output.text.clone(),
    };
    if text.chars().count() > SUMMARY_LIMIT {
        format!("{}\n... (truncated)", text.chars().take(SUMMARY_LIMIT).collect::<String>())
    } else {
        text
    }
}

fn key_arguments(key: &str) -> Map<String, Value> {
    let mut args = Map::new();
    args.insert(arg::KEY.into(), Value::from(key));
    args
}

fn create_arguments(key: &str, value: &str) -> Map<String, Value> {
    let mut args = key_arguments(key);
    args.insert(arg::VALUE.into(), Value::from(value));
    let description: String = value.chars().take(DESCRIPTION_LIMIT).collect();
    args.insert(arg::DESCRIPTION.into(), Value::from(description));
    args
}

fn destructive_operation(tool_name: &str) -> Option<Operation> {
    match tool_name {
        tool::DELETE_MEMORY => Some(Operation::Delete),
        tool::REVOKE_SHARE => Some(Operation::Revoke),
        _ => None,
    }
}

fn retry_for(tool_name: &str) -> Retry {
    if destructive_operation(tool_name).is_some() {
        Retry::Never
    } else {
        Retry::Transient
    }
}

/// Keys named in raw arguments, whatever the field is called.
fn identifiers_in(arguments: &Map<String, Value>) -> Vec<String> {
    const FIELDS: &[&str] = &["key", "key_name", "key_names", "keys", "memory_key", "path"];
    let mut keys = Vec::new();
    for field in FIELDS {
        match arguments.get(*field) {
            Some(Value::String(s)) => keys.push(s.clone()),
            Some(Value::Array(values)) => {
                keys.extend(values.iter().filter_map(Value::as_str).map(str::to_string))
            }
            _ => {}
        }
    }
    keys
}

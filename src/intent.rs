//! Intent classification.
//!
//! A deterministic, ordered phrase table maps an utterance onto one
//! [`Operation`]. The utterance is scanned left to right; at each word the table
//! is tried in order and the first phrase that matches there wins, so the
//! leading verb decides and multi-word phrases listed first beat their
//! single-word prefixes ("remove access" before "remove"). No match means the
//! caller must ask for clarification, and so does a second, different
//! operation joined to the first ("update or delete notes/jan").

use std::fmt;

/// Remote operations the orchestrator can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Get,
    Search,
    Update,
    Delete,
    ListKeys,
    Share,
    Revoke,
    ListPermissions,
    Subscribe,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Get => "get",
            Self::Search => "search",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::ListKeys => "list-keys",
            Self::Share => "share",
            Self::Revoke => "revoke",
            Self::ListPermissions => "list-permissions",
            Self::Subscribe => "subscribe",
        }
    }

    /// Irreversible from the client's point of view; gated by confirmation.
    pub fn is_destructive(&self) -> bool {
        matches!(self, Self::Delete | Self::Revoke)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote tool names.
pub mod tool {
    pub const CREATE_MEMORY: &str = "create_memory";
    pub const GET_MEMORY: &str = "get_memory";
    pub const DISCOVER_MEMORIES: &str = "discover_memories";
    pub const SEARCH_MEMORIES: &str = "search_memories";
    pub const UPDATE_MEMORY: &str = "update_memory";
    pub const DELETE_MEMORY: &str = "delete_memory";
    pub const LIST_KEYS: &str = "list_keys";
    pub const SHARE: &str = "share";
    pub const REVOKE_SHARE: &str = "revoke_share";
    pub const LIST_PERMISSIONS: &str = "list_permissions";
    pub const SUBSCRIBE_TO_MEMORY: &str = "subscribe_to_memory";
}

const PHRASES: &[(&[&str], Operation)] = &[
    (&["revoke", "access"], Operation::Revoke),
    (&["remove", "access"], Operation::Revoke),
    (&["take", "away", "access"], Operation::Revoke),
    (&["revoke"], Operation::Revoke),
    (&["unshare"], Operation::Revoke),
    (&["who", "can", "access"], Operation::ListPermissions),
    (&["who", "has", "access"], Operation::ListPermissions),
    (&["permissions"], Operation::ListPermissions),
    (&["give", "access"], Operation::Share),
    (&["grant", "access"], Operation::Share),
    (&["share"], Operation::Share),
    (&["list", "keys"], Operation::ListKeys),
    (&["list", "memories"], Operation::ListKeys),
    (&["list", "my", "memories"], Operation::ListKeys),
    (&["show", "memories"], Operation::ListKeys),
    (&["show", "my", "memories"], Operation::ListKeys),
    (&["show", "keys"], Operation::ListKeys),
    (&["how", "many", "memories"], Operation::ListKeys),
    (&["notify"], Operation::Subscribe),
    (&["subscribe"], Operation::Subscribe),
    (&["watch"], Operation::Subscribe),
    (&["delete"], Operation::Delete),
    (&["remove"], Operation::Delete),
    (&["forget"], Operation::Delete),
    (&["erase"], Operation::Delete),
    (&["update"], Operation::Update),
    (&["change"], Operation::Update),
    (&["modify"], Operation::Update),
    (&["edit"], Operation::Update),
    (&["remember"], Operation::Create),
    (&["save"], Operation::Create),
    (&["store"], Operation::Create),
    (&["note", "that"], Operation::Create),
    (&["search"], Operation::Search),
    (&["find"], Operation::Search),
    (&["look", "for"], Operation::Search),
    (&["look", "up"], Operation::Search),
    (&["recall"], Operation::Get),
    (&["what", "was"], Operation::Get),
    (&["what", "is", "my"], Operation::Get),
    (&["what's", "my"], Operation::Get),
    (&["get"], Operation::Get),
    (&["fetch"], Operation::Get),
    (&["retrieve"], Operation::Get),
];

/// Words skipped when a phrase's remainder begins with them.
const LEADING_FILLER: &[&str] = &[
    "that", "for", "about", "to", "with", "memories", "memory", "key", "keys", "=", ":", "-",
];

/// Words that join a second verb phrase onto the first.
const COORDINATORS: &[&str] = &["or", "and", "then", "and/or"];

/// A listing followed by one of these is about a topic, not a key range.
const TOPIC_MARKERS: &[&str] = &["about", "regarding", "concerning", "mentioning", "on"];

const KEY_STOP_WORDS: &[&str] = &[
    "my", "the", "a", "an", "that", "our", "i", "to", "of", "for", "is", "are", "we", "this",
];

const NAMESPACES: &[(&[&str], &str)] = &[
    (&["prefer", "preferred", "favorite", "favourite", "like", "likes"], "preferences"),
    (&["decided", "decision", "decide", "chose", "chosen"], "decisions"),
    (&["todo", "need", "must", "remind"], "todos"),
    (&["phone", "email", "birthday", "address", "contact"], "contacts"),
];

const DEFAULT_NAMESPACE: &str = "notes";

/// Classified utterance plus the arguments extracted from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub operation: Operation,
    /// Explicit keys named in the utterance, in order.
    pub keys: Vec<String>,
    /// Free text after the verb phrase (and keys): the value for create/update,
    /// the query for search/recall.
    pub text: Option<String>,
    /// Target user for share/revoke.
    pub user: Option<String>,
}

impl Intent {
    /// Key for a create: the explicit one or one derived from the text.
    pub fn create_key(&self) -> Option<String> {
        self.keys
            .first()
            .cloned()
            .or_else(|| self.text.as_deref().map(derive_key))
    }

    /// Separate values for a multi-item create (`a; b; c`).
    pub fn create_items(&self) -> Vec<String> {
        self.text
            .as_deref()
            .map(|t| {
                t.split(';')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug)]
struct Token<'a> {
    start: usize,
    end: usize,
    raw: &'a str,
    word: String,
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices().chain(std::iter::once((text.len(), ' '))) {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                let raw = &text[s..i];
                tokens.push(Token {
                    start: s,
                    end: i,
                    raw,
                    word: raw
                        .trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                        .to_lowercase(),
                });
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    tokens
}

fn trim_key_punct(raw: &str) -> &str {
    raw.trim_matches(|c: char| matches!(c, ',' | ';' | ':' | '?' | '!' | '"' | '\'' | '`' | '(' | ')'))
        .trim_end_matches('.')
}

/// A hierarchical key: `/`-separated, made of path-safe characters.
pub fn is_key_like(raw: &str) -> bool {
    let candidate = trim_key_punct(raw);
    candidate.contains('/')
        && !candidate.contains("://")
        && candidate.len() > 1
        && candidate
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '/' | '-' | '_' | '.'))
}

/// Classify an utterance. `None` means no confident match.
pub fn classify(utterance: &str) -> Option<Intent> {
    let tokens = tokenize(utterance);
    let (operation, start, len) = first_phrase(&tokens)?;
    if let Some(other) = conflicting_operation(&tokens, start + len, operation) {
        tracing::debug!(first = %operation, second = %other, "conflicting operations requested");
        return None;
    }
    let verb_end = tokens[start + len - 1].end;

    let keys: Vec<String> = tokens
        .iter()
        .filter(|t| t.start >= verb_end && is_key_like(t.raw))
        .map(|t| trim_key_punct(t.raw).to_string())
        .collect();

    let user = match operation {
        Operation::Share | Operation::Revoke => extract_user(&tokens, verb_end),
        _ => None,
    };

    let text = extract_text(utterance, &tokens, verb_end, operation);

    tracing::debug!(operation = %operation, keys = keys.len(), "utterance classified");

    Some(Intent {
        operation,
        keys,
        text,
        user,
    })
}

/// Operation and token length of the first table phrase starting at `i`.
fn phrase_at(tokens: &[Token<'_>], i: usize) -> Option<(Operation, usize)> {
    PHRASES.iter().find_map(|(phrase, operation)| {
        let window = tokens.get(i..i + phrase.len())?;
        window
            .iter()
            .zip(phrase.iter())
            .all(|(t, p)| t.word == *p)
            .then_some((*operation, phrase.len()))
    })
}

/// Leftmost phrase: operation, first token index, token count.
fn first_phrase(tokens: &[Token<'_>]) -> Option<(Operation, usize, usize)> {
    (0..tokens.len()).find_map(|i| phrase_at(tokens, i).map(|(op, len)| (op, i, len)))
}

/// A different operation introduced by a coordinator after `from`.
fn conflicting_operation(tokens: &[Token<'_>], from: usize, operation: Operation) -> Option<Operation> {
    (from.max(1)..tokens.len())
        .filter(|&i| COORDINATORS.contains(&tokens[i - 1].word.as_str()))
        .filter_map(|i| phrase_at(tokens, i).map(|(op, _)| op))
        .find(|&op| op != operation)
}

fn extract_user(tokens: &[Token<'_>], verb_end: usize) -> Option<String> {
    let after: Vec<&Token<'_>> = tokens.iter().filter(|t| t.start >= verb_end).collect();

    if let Some(t) = after.iter().find(|t| t.raw.contains('@')) {
        let handle = trim_key_punct(t.raw);
        let handle = if handle.starts_with('@') && !handle[1..].contains('@') {
            &handle[1..]
        } else {
            handle
        };
        return Some(handle.to_string());
    }

    after
        .windows(2)
        .filter(|w| matches!(w[0].word.as_str(), "with" | "from" | "for" | "to"))
        .map(|w| w[1])
        .find(|t| {
            !is_key_like(t.raw)
                && !t.word.is_empty()
                && !matches!(t.word.as_str(), "access" | "me" | "the" | "my" | "user" | "all")
        })
        .map(|t| trim_key_punct(t.raw).to_string())
}

fn extract_text(utterance: &str, tokens: &[Token<'_>], verb_end: usize, operation: Operation) -> Option<String> {
    // Text starts after the last key for key-addressed updates, else after the verb.
    let start = match operation {
        Operation::Update | Operation::Create => tokens
            .iter()
            .filter(|t| t.start >= verb_end && is_key_like(t.raw))
            .map(|t| t.end)
            .last()
            .unwrap_or(verb_end),
        // "show my memories please" has no topic; "show memories about X" does.
        Operation::ListKeys => {
            let marker = tokens
                .iter()
                .filter(|t| t.start >= verb_end && !is_key_like(t.raw))
                .find(|t| TOPIC_MARKERS.contains(&t.word.as_str()))?;
            marker.end
        }
        _ => verb_end,
    };

    let mut rest = utterance[start..].trim();
    loop {
        let first = rest.split_whitespace().next().unwrap_or("");
        let lowered = first.to_lowercase();
        if !first.is_empty() && LEADING_FILLER.contains(&lowered.as_str()) {
            rest = rest[first.len()..].trim_start();
        } else if let Some(stripped) = rest.strip_prefix(':').or_else(|| rest.strip_prefix('=')) {
            rest = stripped.trim_start();
        } else {
            break;
        }
    }

    let rest = rest.trim_end_matches(['?', '.']).trim();
    (!rest.is_empty()).then(|| rest.to_string())
}

/// Derive `<namespace>/<slug>` from free text.
///
/// The slug comes from the subject: words before the first `is`/`are`/`was`/`=`,
/// minus stop words, at most four words.
pub fn derive_key(text: &str) -> String {
    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .collect();

    let namespace = NAMESPACES
        .iter()
        .find(|(triggers, _)| words.iter().any(|w| triggers.contains(&w.as_str())))
        .map(|(_, ns)| *ns)
        .unwrap_or(DEFAULT_NAMESPACE);

    let subject_end = words
        .iter()
        .position(|w| matches!(w.as_str(), "is" | "are" | "was" | "were" | ""))
        .filter(|&pos| pos > 0)
        .unwrap_or(words.len());

    let slug = words[..subject_end]
        .iter()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric() || *c == '-')
                .collect::<String>()
        })
        .filter(|w| !w.is_empty() && !KEY_STOP_WORDS.contains(&w.as_str()))
        .take(4)
        .collect::<Vec<_>>()
        .join("-");

    if slug.is_empty() {
        format!("{namespace}/{}", uuid::Uuid::now_v7().simple())
    } else {
        format!("{namespace}/{slug}")
    }
}

//! Error classification for retry decisions.
//!
//! Every predicate walks the full `source()` chain. Typed errors
//! (`std::io::Error`, `reqwest::Error`, [`CovpagesError`]) are inspected
//! structurally first; anything else falls back to matching the lowercased
//! message text with URLs removed. Status codes found in text only count when
//! phrased as a status (`status 404`, `HTTP 503`, a message starting with the
//! code), and only when no typed status code is present. No predicate
//! performs I/O.

use crate::error::CovpagesError;
use regex::Regex;
use std::error::Error;
use std::io::ErrorKind;
use std::sync::LazyLock;

type DynError<'a> = &'a (dyn Error + 'static);

static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z][a-z0-9+.-]*://\S+").unwrap());

static STATUS_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\bstatus(?: code)?|\bhttp(?:/[0-9.]+)?|\breturned|\bcode)[\s:=(]*([1-5][0-9]{2})\b")
        .unwrap()
});

const NETWORK_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "connection aborted",
    "broken pipe",
    "network is unreachable",
    "temporary failure in name resolution",
    "dns temporary",
    "deadline exceeded",
];

const HTTP_PATTERNS: &[&str] = &[
    "too many requests",
    "internal server error",
    "bad gateway",
    "service unavailable",
    "gateway timeout",
];

const GITHUB_RETRYABLE_PATTERNS: &[&str] = &[
    "rate limit",
    "abuse detection",
    "secondary rate",
    "server error",
];

const GITHUB_PERMANENT_PATTERNS: &[&str] = &[
    "bad credentials",
    "unauthorized",
    "forbidden",
    "not found",
    "resource not accessible",
];

const FILESYSTEM_PATTERNS: &[&str] = &[
    "resource busy",
    "text file busy",
    "no space left",
    "would block",
    "resource temporarily unavailable",
    "too many open files",
];

fn chain(err: DynError<'_>) -> impl Iterator<Item = DynError<'_>> {
    std::iter::successors(Some(err), |&e| e.source())
}

fn message(err: DynError<'_>) -> String {
    URL.replace_all(&err.to_string().to_lowercase(), "")
        .into_owned()
}

fn chain_text(err: DynError<'_>) -> String {
    chain(err).map(message).collect::<Vec<_>>().join(": ")
}

fn matches_any(text: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| text.contains(p))
}

fn io_kinds(err: DynError<'_>) -> impl Iterator<Item = ErrorKind> + '_ {
    chain(err).filter_map(|e| e.downcast_ref::<std::io::Error>().map(|io| io.kind()))
}

fn covpages_errors(err: DynError<'_>) -> impl Iterator<Item = &CovpagesError> {
    chain(err).filter_map(|e| e.downcast_ref::<CovpagesError>())
}

fn status_codes(err: DynError<'_>) -> impl Iterator<Item = u16> + '_ {
    chain(err).filter_map(|e| {
        if let Some(cov) = e.downcast_ref::<CovpagesError>() {
            return match cov {
                CovpagesError::Http { status, .. } => Some(*status),
                CovpagesError::GitHubApi { status_code, .. } => *status_code,
                CovpagesError::VerificationFailed { status, .. } => Some(*status),
                _ => None,
            };
        }
        e.downcast_ref::<reqwest::Error>()
            .and_then(|r| r.status())
            .map(|s| s.as_u16())
    })
}

fn text_status_codes(err: DynError<'_>) -> Vec<u16> {
    chain(err)
        .flat_map(|e| {
            let msg = message(e);
            STATUS_PHRASE
                .captures_iter(&msg)
                .filter_map(|c| c[1].parse::<u16>().ok())
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Typed status codes win; text is consulted only when none are present.
fn any_status(err: DynError<'_>, wanted: impl Fn(u16) -> bool) -> bool {
    let typed: Vec<u16> = status_codes(err).collect();
    if typed.is_empty() {
        text_status_codes(err).into_iter().any(wanted)
    } else {
        typed.into_iter().any(wanted)
    }
}

/// Errors that retrying can never fix regardless of what they wrap.
fn is_terminal(err: DynError<'_>) -> bool {
    covpages_errors(err).any(|e| {
        matches!(
            e,
            CovpagesError::NonRetryable { .. }
                | CovpagesError::Cancelled
                | CovpagesError::MissingMetadata { .. }
                | CovpagesError::NoBackupForRollback
                | CovpagesError::PanicRecovered(_)
                | CovpagesError::CircuitBreakerOpen { .. }
                | CovpagesError::Config { .. }
        )
    })
}

/// Timeouts, resets, refusals, temporary DNS failures and deadline errors.
pub fn is_retryable_network_error(err: DynError<'_>) -> bool {
    if is_terminal(err) {
        return false;
    }

    let typed = io_kinds(err).any(|kind| {
        matches!(
            kind,
            ErrorKind::TimedOut
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
                | ErrorKind::NotConnected
        )
    }) || chain(err).any(|e| {
        e.downcast_ref::<reqwest::Error>()
            .is_some_and(|r| r.is_timeout() || r.is_connect())
            || matches!(e.downcast_ref::<CovpagesError>(), Some(CovpagesError::Timeout(_)))
    });

    typed || matches_any(&chain_text(err), NETWORK_PATTERNS)
}

/// HTTP 429, 500, 502, 503 and 504.
pub fn is_retryable_http_error(err: DynError<'_>) -> bool {
    if is_terminal(err) {
        return false;
    }

    any_status(err, |s| matches!(s, 429 | 500 | 502 | 503 | 504))
        || matches_any(&chain_text(err), HTTP_PATTERNS)
}

/// Authentication, permission and missing-resource failures from GitHub.
pub fn is_permanent_github_error(err: DynError<'_>) -> bool {
    any_status(err, |s| matches!(s, 401 | 403 | 404))
        || matches_any(&chain_text(err), GITHUB_PERMANENT_PATTERNS)
}

/// Rate limiting, abuse detection and 5xx from GitHub.
///
/// 401, 403 and 404 are checked first and are never retryable, even when the
/// message also mentions a rate limit.
pub fn is_retryable_github_error(err: DynError<'_>) -> bool {
    if is_terminal(err) || is_permanent_github_error(err) {
        return false;
    }

    let text = chain_text(err);
    matches_any(&text, GITHUB_RETRYABLE_PATTERNS)
        || is_retryable_http_error(err)
        || is_retryable_network_error(err)
}

/// Transient resource contention. A missing file is not transient.
pub fn is_retryable_filesystem_error(err: DynError<'_>) -> bool {
    if is_terminal(err) {
        return false;
    }

    if io_kinds(err).any(|kind| kind == ErrorKind::NotFound) {
        return false;
    }

    let text = chain_text(err);
    if text.contains("no such file or directory") {
        return false;
    }

    io_kinds(err).any(|kind| matches!(kind, ErrorKind::WouldBlock | ErrorKind::Interrupted))
        || matches_any(&text, FILESYSTEM_PATTERNS)
}

/// Union of all classifiers with the GitHub permanent codes taking precedence.
pub fn is_retryable_error(err: DynError<'_>) -> bool {
    if is_terminal(err) || is_permanent_github_error(err) {
        return false;
    }

    is_retryable_network_error(err)
        || is_retryable_http_error(err)
        || is_retryable_github_error(err)
        || is_retryable_filesystem_error(err)
}

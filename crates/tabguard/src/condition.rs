//! Wait conditions
//!
//! Reusable predicates over a [`BrowsingSession`], plus combinators. Every
//! condition only observes the session; none of them navigates or switches.

use crate::result::BoxError;
use crate::session::BrowsingSession;
use async_trait::async_trait;
use regex::Regex;

// =============================================================================
// WAIT CONDITION TRAIT
// =============================================================================

/// Trait for custom wait conditions
#[async_trait]
pub trait WaitCondition: Send + Sync {
    /// Check if the condition is satisfied
    async fn check(&self) -> Result<bool, BoxError>;

    /// Get description for logs and error messages
    fn description(&self) -> String;
}

/// Boxed condition, used by the combinators
pub type BoxedCondition<'a> = Box<dyn WaitCondition + 'a>;

/// A function-based wait condition
pub struct FnCondition<F: Fn() -> bool + Send + Sync> {
    func: F,
    description: String,
}

impl<F: Fn() -> bool + Send + Sync> std::fmt::Debug for FnCondition<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCondition")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl<F: Fn() -> bool + Send + Sync> FnCondition<F> {
    /// Create a new function condition
    pub fn new(func: F, description: impl Into<String>) -> Self {
        Self {
            func,
            description: description.into(),
        }
    }
}

#[async_trait]
impl<F: Fn() -> bool + Send + Sync> WaitCondition for FnCondition<F> {
    async fn check(&self) -> Result<bool, BoxError> {
        Ok((self.func)())
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

// =============================================================================
// URL CONDITIONS
// =============================================================================

/// How a URL condition matches `current_url()`
#[derive(Debug, Clone)]
pub enum UrlMatch {
    /// URL contains the fragment
    Contains(String),
    /// URL equals the string
    Is(String),
    /// URL matches the regex
    Matches(Regex),
    /// URL differs from the recorded one (same-tab navigation)
    ChangedFrom(String),
}

impl UrlMatch {
    fn matches(&self, url: &str) -> bool {
        match self {
            Self::Contains(fragment) => url.contains(fragment.as_str()),
            Self::Is(expected) => url == expected,
            Self::Matches(re) => re.is_match(url),
            Self::ChangedFrom(original) => url != original,
        }
    }
}

impl std::fmt::Display for UrlMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Contains(fragment) => write!(f, "URL containing {fragment:?}"),
            Self::Is(expected) => write!(f, "URL to be {expected:?}"),
            Self::Matches(re) => write!(f, "URL matching /{}/", re.as_str()),
            Self::ChangedFrom(original) => write!(f, "URL to change from {original:?}"),
        }
    }
}

/// Condition on the focused context's URL
#[derive(Debug, Clone)]
pub struct UrlCondition<S> {
    session: S,
    matcher: UrlMatch,
}

impl<S: BrowsingSession> UrlCondition<S> {
    /// Create a URL condition
    pub const fn new(session: S, matcher: UrlMatch) -> Self {
        Self { session, matcher }
    }
}

#[async_trait]
impl<S: BrowsingSession> WaitCondition for UrlCondition<S> {
    async fn check(&self) -> Result<bool, BoxError> {
        let url = self.session.current_url().await?;
        Ok(self.matcher.matches(&url))
    }

    fn description(&self) -> String {
        self.matcher.to_string()
    }
}

/// Wait for the URL to contain `fragment`
pub fn url_contains<S: BrowsingSession>(session: S, fragment: impl Into<String>) -> UrlCondition<S> {
    UrlCondition::new(session, UrlMatch::Contains(fragment.into()))
}

/// Wait for the URL to equal `url`
pub fn url_is<S: BrowsingSession>(session: S, url: impl Into<String>) -> UrlCondition<S> {
    UrlCondition::new(session, UrlMatch::Is(url.into()))
}

/// Wait for the URL to match a regular expression
pub fn url_matches<S: BrowsingSession>(
    session: S,
    pattern: &str,
) -> Result<UrlCondition<S>, regex::Error> {
    Ok(UrlCondition::new(session, UrlMatch::Matches(Regex::new(pattern)?)))
}

/// Wait for a same-tab navigation away from `original`
pub fn url_changed_from<S: BrowsingSession>(
    session: S,
    original: impl Into<String>,
) -> UrlCondition<S> {
    UrlCondition::new(session, UrlMatch::ChangedFrom(original.into()))
}

// =============================================================================
// TITLE CONDITIONS
// =============================================================================

/// Condition on the focused context's title
#[derive(Debug, Clone)]
pub struct TitleCondition<S> {
    session: S,
    expected: String,
    exact: bool,
}

#[async_trait]
impl<S: BrowsingSession> WaitCondition for TitleCondition<S> {
    async fn check(&self) -> Result<bool, BoxError> {
        let title = self.session.title().await?;
        Ok(if self.exact {
            title == self.expected
        } else {
            title.contains(self.expected.as_str())
        })
    }

    fn description(&self) -> String {
        if self.exact {
            format!("title to be {:?}", self.expected)
        } else {
            format!("title containing {:?}", self.expected)
        }
    }
}

/// Wait for the title to contain `fragment`
pub fn title_contains<S: BrowsingSession>(
    session: S,
    fragment: impl Into<String>,
) -> TitleCondition<S> {
    TitleCondition {
        session,
        expected: fragment.into(),
        exact: false,
    }
}

/// Wait for the title to equal `title`
pub fn title_is<S: BrowsingSession>(session: S, title: impl Into<String>) -> TitleCondition<S> {
    TitleCondition {
        session,
        expected: title.into(),
        exact: true,
    }
}

// =============================================================================
// CONTEXT COUNT
// =============================================================================

/// Condition on the number of open contexts
#[derive(Debug, Clone)]
pub struct ContextCountCondition<S> {
    session: S,
    expected: usize,
}

#[async_trait]
impl<S: BrowsingSession> WaitCondition for ContextCountCondition<S> {
    async fn check(&self) -> Result<bool, BoxError> {
        Ok(self.session.current_contexts().await?.len() == self.expected)
    }

    fn description(&self) -> String {
        format!("{} open context(s)", self.expected)
    }
}

/// Wait for exactly `expected` contexts to be open
pub fn number_of_contexts_is<S: BrowsingSession>(
    session: S,
    expected: usize,
) -> ContextCountCondition<S> {
    ContextCountCondition { session, expected }
}

// =============================================================================
// COMBINATORS
// =============================================================================

/// Satisfied when any inner condition is; evaluated in order, short-circuiting
pub struct AnyOf<'a>(Vec<BoxedCondition<'a>>);

/// Satisfied when every inner condition is; evaluated in order, short-circuiting
pub struct AllOf<'a>(Vec<BoxedCondition<'a>>);

/// Satisfied when the inner condition is not
pub struct Not<'a>(BoxedCondition<'a>);

impl std::fmt::Debug for AnyOf<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AnyOf").field(&self.description()).finish()
    }
}

impl std::fmt::Debug for AllOf<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AllOf").field(&self.description()).finish()
    }
}

impl std::fmt::Debug for Not<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Not").field(&self.description()).finish()
    }
}

fn join_descriptions(conditions: &[BoxedCondition<'_>], sep: &str) -> String {
    conditions
        .iter()
        .map(|c| c.description())
        .collect::<Vec<_>>()
        .join(sep)
}

#[async_trait]
impl WaitCondition for AnyOf<'_> {
    async fn check(&self) -> Result<bool, BoxError> {
        for condition in &self.0 {
            if condition.check().await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn description(&self) -> String {
        format!("any of ({})", join_descriptions(&self.0, " | "))
    }
}

#[async_trait]
impl WaitCondition for AllOf<'_> {
    async fn check(&self) -> Result<bool, BoxError> {
        for condition in &self.0 {
            if !condition.check().await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn description(&self) -> String {
        format!("all of ({})", join_descriptions(&self.0, " & "))
    }
}

#[async_trait]
impl WaitCondition for Not<'_> {
    async fn check(&self) -> Result<bool, BoxError> {
        Ok(!self.0.check().await?)
    }

    fn description(&self) -> String {
        format!("not {}", self.0.description())
    }
}

/// Any of the given conditions
pub fn any_of<'a>(conditions: Vec<BoxedCondition<'a>>) -> AnyOf<'a> {
    AnyOf(conditions)
}

/// All of the given conditions
pub fn all_of<'a>(conditions: Vec<BoxedCondition<'a>>) -> AllOf<'a> {
    AllOf(conditions)
}

/// Negation of a condition
pub fn not<'a>(condition: impl WaitCondition + 'a) -> Not<'a> {
    Not(Box::new(condition))
}

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    // Literal pattern, cannot fail to compile.
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\{\s*([^{}]*?)\s*\}").unwrap()
});

/// Substitutes `{name}` placeholders in `template` with values from `params`.
///
/// Whitespace inside the braces is ignored when looking up the key. A
/// placeholder whose key is not in `params` is kept exactly as written.
///
/// ```
/// use std::collections::HashMap;
/// use apigw_client::replace_placeholders;
///
/// let params = HashMap::from([("id".to_owned(), "42".to_owned())]);
/// assert_eq!(replace_placeholders("/users/{ id }/{tab}", &params), "/users/42/{tab}");
/// ```
#[must_use]
pub fn replace_placeholders<S: std::hash::BuildHasher>(
    template: &str,
    params: &HashMap<String, String, S>,
) -> String {
    if params.is_empty() {
        return template.to_owned();
    }

    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match params.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_owned(),
        })
        .into_owned()
}

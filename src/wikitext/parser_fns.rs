//! Built-in parser functions and magic words.
//!
//! A parser-function name begins with `#` (`{{#if:…}}`); the parser hands
//! the whole target over as the template name, so `#if:cond` arrives here
//! with `cond` still attached. Magic words (`{{NAMESPACE}}`,
//! `{{NUMBEROFARTICLES}}`) are expansions computed from page or site
//! state, carried in a [`SiteContext`].

use super::{concat, Attribute, Fragment, HandlerError};

/// The page and site state magic words draw from.
#[derive(Clone, Debug)]
pub struct SiteContext {
    /// The title of the page being rendered.
    pub title: String,
    /// The number of articles in the loaded title map.
    pub article_count: usize,
}

/// Builds a template handler that evaluates the built-in parser functions
/// and magic words against `site` and rejects everything else, suitable
/// for [`Options::template_handler`](super::Options::template_handler).
pub fn site_handler(
    site: SiteContext,
) -> impl Fn(&str, &[Attribute]) -> Result<Fragment, HandlerError> + Sync {
    move |name, args| evaluate(&site, name, args)
}

/// Evaluates one template invocation against the built-ins.
///
/// Unknown plain templates return [`HandlerError::UnknownTemplate`];
/// callers that can resolve article templates should try that first and
/// fall back here.
pub fn evaluate(
    site: &SiteContext,
    name: &str,
    args: &[Attribute],
) -> Result<Fragment, HandlerError> {
    if name == "NAMESPACE" {
        let mut parts = site.title.splitn(2, ':');
        let prefix = parts.next().unwrap_or_default();
        return Ok(if parts.next().is_some() {
            Fragment::text(prefix)
        } else {
            Fragment::Empty
        });
    }
    if name == "NUMBEROFARTICLES" {
        return Ok(Fragment::Int(site.article_count as i64));
    }
    if let Some(rest) = name.strip_prefix('#') {
        // `{{#if:cond|then|else}}` parses with `cond` glued to the
        // function name; split it off and prepend it as the first
        // argument.
        let (function, first) = match rest.split_once(':') {
            Some((function, first)) => (function, Some(first)),
            None => (rest, None),
        };
        let mut all = Vec::with_capacity(args.len() + 1);
        if let Some(first) = first {
            all.push(Attribute::positional(first));
        }
        all.extend(args.iter().cloned());
        return function_hook(function, &all);
    }
    Err(HandlerError::UnknownTemplate)
}

/// Dispatches a parser function by name.
fn function_hook(name: &str, args: &[Attribute]) -> Result<Fragment, HandlerError> {
    match name {
        "if" => pf_if(args),
        "ifeq" => pf_ifeq(args),
        // Embedded scripting is not wired up; modules expand to nothing.
        "invoke" => {
            log::debug!("#invoke expands to nothing");
            Ok(Fragment::Empty)
        }
        _ => Err(HandlerError::UnknownFunction(name.to_string())),
    }
}

/// `{{#if:cond|then|else}}`: trimmed `cond` non-empty selects `then`.
fn pf_if(args: &[Attribute]) -> Result<Fragment, HandlerError> {
    if !(2..=3).contains(&args.len()) {
        return Err(HandlerError::Arity {
            function: "#if",
            expected: "2 or 3",
            got: args.len(),
        });
    }
    let cond = concat(std::slice::from_ref(&args[0].key));
    if !cond.trim().is_empty() {
        Ok(args[1].key.clone())
    } else if let Some(otherwise) = args.get(2) {
        Ok(otherwise.key.clone())
    } else {
        Ok(Fragment::Empty)
    }
}

/// `{{#ifeq:a|b|then|else}}`: numeric equality when both sides parse as
/// floats, string equality otherwise.
fn pf_ifeq(args: &[Attribute]) -> Result<Fragment, HandlerError> {
    if !(3..=4).contains(&args.len()) {
        return Err(HandlerError::Arity {
            function: "#ifeq",
            expected: "3 or 4",
            got: args.len(),
        });
    }
    let a = concat(std::slice::from_ref(&args[0].key));
    let b = concat(std::slice::from_ref(&args[1].key));
    let equal = match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    };
    if equal {
        Ok(args[2].key.clone())
    } else if let Some(otherwise) = args.get(3) {
        Ok(otherwise.key.clone())
    } else {
        Ok(Fragment::Empty)
    }
}

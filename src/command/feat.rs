//! # Feat
//!
//! Parser for the FEAT response body, RFC 2389 §3.2.
//!
//! The reply looks like:
//!
//! ```text
//! 211-Extensions supported:
//!  EPRT
//!  EPSV
//!  MLST type*;size*;modify*;
//!  REST STREAM
//! 211 END
//! ```
//!
//! Every feature line begins with a single space; the feature name may be
//! followed by an argument string. Anything else (including blank lines some
//! servers emit between features) is ignored.

use crate::types::Features;

/// Parses the body of a FEAT reply into the feature map. Feature names are
/// upper-cased; the argument string, when present, is kept verbatim.
///
/// Servers that do not support FEAT never get here (the non-2xx reply short
/// circuits into an empty map), so this function never fails: unparseable
/// lines are skipped.
pub(crate) fn parse_features(body: &str) -> Features {
    let mut features = Features::new();

    for line in body.lines() {
        if !line.starts_with(' ') {
            continue;
        }
        let mut parts = line.trim().splitn(2, ' ');
        let name = match parts.next() {
            Some(name) if !name.is_empty() => name.to_uppercase(),
            _ => continue,
        };
        let argument = parts.next().map(str::to_string);
        debug!("found supported feature: {name}: {argument:?}");
        features.insert(name, argument);
    }

    features
}

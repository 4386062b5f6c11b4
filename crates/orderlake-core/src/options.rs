//! Invocation parameter resolution.
//!
//! Job launchers pass parameters as `--KEY value` (or `--KEY=value`) pairs mixed in
//! with their own flags. Only the requested keys are kept.

use std::collections::BTreeMap;

use orderlake_bucket::ObjectLocation;
use serde::Serialize;

use crate::error::{EtlError, Result};

pub const JOB_NAME: &str = "JOB_NAME";
pub const S3_BUCKET: &str = "S3_BUCKET";
pub const S3_KEY: &str = "S3_KEY";

pub const REQUIRED_JOB_ARGS: &[&str] = &[JOB_NAME, S3_BUCKET, S3_KEY];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ResolvedOptions {
    values: BTreeMap<String, String>,
}

impl ResolvedOptions {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| EtlError::MissingArgument(vec![key.to_string()]))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Pick the `required` keys out of `args`. Empty values count as absent and a
/// repeated key keeps its last value.
pub fn resolve_options<I, S>(args: I, required: &[&str]) -> Result<ResolvedOptions>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let args: Vec<S> = args.into_iter().collect();
    let mut values = BTreeMap::new();
    let mut idx = 0;

    while idx < args.len() {
        let arg = args[idx].as_ref();
        idx += 1;

        let Some(flag) = arg.strip_prefix("--") else {
            continue;
        };

        let (name, value) = match flag.split_once('=') {
            Some((name, value)) => (name, Some(value.to_string())),
            None => {
                let next = args.get(idx).map(|next| next.as_ref());
                match next {
                    Some(next) if !next.starts_with("--") => {
                        idx += 1;
                        (flag, Some(next.to_string()))
                    }
                    _ => (flag, None),
                }
            }
        };

        if !required.contains(&name) {
            continue;
        }
        match value {
            Some(value) if !value.is_empty() => {
                values.insert(name.to_string(), value);
            }
            _ => {
                values.remove(name);
            }
        }
    }

    let missing: Vec<String> = required
        .iter()
        .filter(|key| !values.contains_key(**key))
        .map(|key| key.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(EtlError::MissingArgument(missing));
    }

    Ok(ResolvedOptions { values })
}

/// The three parameters this job needs, resolved and typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobArguments {
    pub job_name: String,
    pub bucket: String,
    pub key: String,
    pub options: ResolvedOptions,
}

impl JobArguments {
    pub fn from_args<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let options = resolve_options(args, REQUIRED_JOB_ARGS)?;
        Ok(Self {
            job_name: options.require(JOB_NAME)?.to_string(),
            bucket: options.require(S3_BUCKET)?.to_string(),
            key: options.require(S3_KEY)?.to_string(),
            options,
        })
    }

    pub fn source_location(&self, scheme: &str) -> Result<ObjectLocation> {
        ObjectLocation::new(scheme, self.bucket.as_str(), self.key.as_str()).map_err(|err| {
            EtlError::SourceNotFound {
                location: format!("{scheme}://{}/{}", self.bucket, self.key),
                reason: err.to_string(),
            }
        })
    }
}

//! Placeholder expansion for URLs and member names.
//!
//! Only three placeholders exist: `{{.Version}}`, `{{.OS}}` and `{{.Arch}}`
//! (whitespace inside the braces is allowed). Expansion is plain textual
//! substitution; anything else between `{{` and `}}` is rejected.

use regex::Regex;
use url::Url;
use crate::config::Platform;
use crate::error::KindlyError;

const PLACEHOLDER: &str = r"\{\{(.*?)\}\}";

/// Executable suffix appended to binary member names on Windows.
pub const WINDOWS_EXE_SUFFIX: &str = ".exe";

/// Values substituted into a template.
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    /// `None` for contexts where `{{.Version}}` is not meaningful (binary names).
    pub version: Option<&'a str>,
    pub os: &'a str,
    pub arch: &'a str,
}

impl<'a> TemplateContext<'a> {
    pub fn new(version: &'a str, platform: &'a Platform) -> Self {
        Self { version: Some(version), os: &platform.os, arch: &platform.arch }
    }

    pub fn platform_only(platform: &'a Platform) -> Self {
        Self { version: None, os: &platform.os, arch: &platform.arch }
    }
}

/// Expands every placeholder in `template`.
pub fn expand(template: &str, ctx: &TemplateContext<'_>) -> Result<String, KindlyError> {
    let re = Regex::new(PLACEHOLDER)
        .map_err(|e| KindlyError::template(template, e.to_string()))?;

    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in re.captures_iter(template) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&template[last..whole.start()]);
        let value = match inner.as_str().trim() {
            ".Version" => ctx.version.ok_or_else(|| {
                KindlyError::template(template, "{{.Version}} is not available here")
            })?,
            ".OS" => ctx.os,
            ".Arch" => ctx.arch,
            other => {
                return Err(KindlyError::template(
                    template,
                    format!("unknown placeholder {{{{{other}}}}}"),
                ));
            }
        };
        out.push_str(value);
        last = whole.end();
    }
    out.push_str(&template[last..]);

    if out.contains("{{") {
        return Err(KindlyError::template(template, "unclosed placeholder"));
    }
    Ok(out)
}

/// Expands a URL template and checks the result is a non-empty, well-formed URL.
pub fn expand_url(template: &str, ctx: &TemplateContext<'_>) -> Result<Url, KindlyError> {
    let expanded = expand(template, ctx)?;
    let expanded = expanded.trim();
    if expanded.is_empty() {
        return Err(KindlyError::template(template, "expands to an empty URL"));
    }
    Url::parse(expanded).map_err(|e| KindlyError::template(template, e.to_string()))
}

/// Expands an optional URL template; blank templates mean "absent".
pub fn expand_optional_url(
    template: &str,
    ctx: &TemplateContext<'_>,
) -> Result<Option<Url>, KindlyError> {
    if template.trim().is_empty() {
        return Ok(None);
    }
    expand_url(template, ctx).map(Some)
}

/// Expands a binary member name against OS and architecture, appending
/// `.exe` when the target is Windows.
pub fn expand_bin_name(name: &str, platform: &Platform) -> Result<String, KindlyError> {
    let mut expanded = expand(name, &TemplateContext::platform_only(platform))?;
    if platform.is_windows() {
        expanded.push_str(WINDOWS_EXE_SUFFIX);
    }
    Ok(expanded)
}

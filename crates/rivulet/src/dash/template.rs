use std::{collections::HashMap, sync::LazyLock};

use regex::{Regex, Replacer};

// Per DASH-IF IOP, only %0[width]d is permitted as a format identifier, so a
// full printf implementation is unnecessary.
//
// Example template: "$RepresentationID$/$Number%06d$.m4s"
static TEMPLATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(RepresentationID|Number|Time|Bandwidth)(?:%0([\d])d)?\$").unwrap()
});

pub(crate) struct Template<'a> {
    args: HashMap<&'a str, String>,
}

impl Template<'_> {
    pub const REPRESENTATION_ID: &'static str = "RepresentationID";
    pub const NUMBER: &'static str = "Number";
    pub const TIME: &'static str = "Time";
    pub const BANDWIDTH: &'static str = "Bandwidth";

    pub fn new() -> Self {
        Self {
            args: HashMap::with_capacity(4),
        }
    }

    pub fn insert(&mut self, key: &'static str, value: String) {
        self.args.insert(key, value);
    }

    pub fn resolve(&self, template: &str) -> String {
        TEMPLATE_REGEX
            .replace_all(template, TemplateReplacer(&self.args))
            .to_string()
    }
}

struct TemplateReplacer<'a>(&'a HashMap<&'a str, String>);

impl Replacer for TemplateReplacer<'_> {
    fn replace_append(&mut self, caps: &regex::Captures<'_>, dst: &mut String) {
        let key = caps.get(1).unwrap().as_str();
        let Some(value) = self.0.get(key) else {
            dst.push_str(caps.get(0).unwrap().as_str());
            return;
        };

        let width = caps.get(2).map(|m| m.as_str().parse().unwrap());
        if let Some(width) = width {
            dst.push_str(&format!("{value:0>width$}", width = width));
        } else {
            dst.push_str(value.as_str());
        }
    }
}

use std::collections::BTreeMap;
use std::fs;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::error::PipelineError;


const PLASTIC_BRT: &str = include_str!("../templates/plastic_brt.adoc");
const CRYO_BRT: &str = include_str!("../templates/cryo_brt.adoc");


/// Finds a named adoc template. A file `<name>.adoc` in the configured template folder
/// wins over the built-in templates.
pub fn load(config: &Config, name: &str) -> Result<String> {

	if let Some(dir) = &config.template_dir {
		let path = dir.join(format!("{}.adoc", name));
		if path.is_file() {
			return fs::read_to_string(&path)
				.context(format!("Failed to read template: {}", path.to_string_lossy()));
		}
	}

	match name {
		"plastic_brt" => Ok(PLASTIC_BRT.to_string()),
		"cryo_brt" => Ok(CRYO_BRT.to_string()),
		_ => Err(PipelineError::validation(format!("unknown adoc template: {}", name)))
	}
}


/// Replaces every `{{ key }}` with its value. Every placeholder must have a value.
pub fn render(template: &str, values: &BTreeMap<&str,String>) -> Result<String> {

	let mut out = String::with_capacity(template.len());
	let mut rest = template;

	while let Some(start) = rest.find("{{") {
		out.push_str(&rest[.. start]);
		let after = &rest[start + 2 ..];
		let end = after.find("}}")
			.ok_or_else(|| PipelineError::validation("template has an unclosed {{"))?;
		let key = after[.. end].trim();
		let value = values.get(key)
			.ok_or_else(|| PipelineError::validation(format!("template has no value for: {}", key)))?;
		out.push_str(value);
		rest = &after[end + 2 ..];
	}
	out.push_str(rest);

	Ok(out)
}

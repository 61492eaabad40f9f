//! Line-oriented configuration diffing.
//!
//! Two consumers: change detection (is there any diff at all, used by
//! `ChangeIndex::set_config` before committing) and human-facing rendering.
//! The hierarchical compare understands router/switch-style indentation and
//! re-emits the enclosing section lines above each changed line, so a change
//! buried in an `interface` block still reads in context.

use similar::{ChangeTag, TextDiff};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffMode {
	Add,
	Remove,
	Context,
}

impl DiffMode {
	fn prefix(self) -> &'static str {
		match self {
			Self::Add => "+ ",
			Self::Remove => "- ",
			Self::Context => "  ",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
	pub mode: DiffMode,
	pub line: String,
}

impl DiffLine {
	pub fn render(&self) -> String {
		format!("{}{}", self.mode.prefix(), self.line)
	}
}

struct ContextLine {
	line: String,
	depth: usize,
}

fn depth_of(line: &str) -> usize {
	line.chars().take_while(|c| c.is_whitespace()).count()
}

#[derive(Debug, Default)]
pub struct Differ;

impl Differ {
	pub fn new() -> Self {
		Self
	}

	/// Plain line compare, no context collapsing.
	fn compare(&self, a: &str, b: &str) -> Vec<(ChangeTag, String)> {
		let diff = TextDiff::from_lines(a, b);
		diff.iter_all_changes()
			.map(|change| {
				let line = change
					.value()
					.trim_end_matches(|c| c == '\n' || c == '\r')
					.to_string();
				(change.tag(), line)
			})
			.collect()
	}

	/// Byte-level "did anything change" check. This is the steady-state hot
	/// path: identical snapshots must short-circuit without a commit.
	pub fn is_diff(&self, a: &str, b: &str) -> bool {
		self.compare(a, b)
			.iter()
			.any(|(tag, _)| *tag != ChangeTag::Equal)
	}

	/// Indentation-aware compare. Only changed lines are emitted, each
	/// preceded by the still-open section headers that enclose it.
	pub fn hierarchical_compare(&self, a: &str, b: &str) -> Vec<DiffLine> {
		let mut output = Vec::new();
		let mut context: Vec<ContextLine> = Vec::new();

		for (tag, line) in self.compare(a, b) {
			let depth = depth_of(&line);
			match tag {
				ChangeTag::Delete | ChangeTag::Insert => {
					context.retain(|c| c.depth < depth);
					for ctx in context.drain(..) {
						output.push(DiffLine {
							mode: DiffMode::Context,
							line: ctx.line,
						});
					}
					output.push(DiffLine {
						mode: if tag == ChangeTag::Insert {
							DiffMode::Add
						} else {
							DiffMode::Remove
						},
						line,
					});
				}
				ChangeTag::Equal => {
					let ctx = ContextLine { line, depth };
					if depth == 0 {
						context = vec![ctx];
					} else if let Some(last) = context.last() {
						if depth == last.depth {
							context.pop();
							context.push(ctx);
						} else if depth > last.depth {
							context.push(ctx);
						} else {
							context.retain(|c| c.depth < depth);
							context.push(ctx);
						}
					}
				}
			}
		}

		output
	}

	/// Classic unified diff of two versions of one file.
	pub fn unified(&self, path: &str, a: &str, b: &str) -> String {
		TextDiff::from_lines(a, b)
			.unified_diff()
			.context_radius(3)
			.header(&format!("a/{path}"), &format!("b/{path}"))
			.to_string()
	}
}

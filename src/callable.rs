//! The work functions that jobs execute must implement the `Callable` trait.
//!
//! Every run gets its own [`RunContext`]: captured output buffers plus the
//! keyword arguments bound at registration. Runs own their buffers, so
//! overlapping parallel jobs never share stream state.

use serde_json::{Map, Value};
use std::fmt;

/// Keyword arguments bound to a job at registration.
pub type Kwargs = Map<String, Value>;

/// What a job function returns; any error is captured, never propagated.
pub type JobResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Per-run execution context handed to the job function.
///
/// Implements [`fmt::Write`], so `write!`/`writeln!` land in the run's
/// captured log:
///
/// ```rust
/// use duty::{JobResult, RunContext};
/// use std::fmt::Write;
///
/// fn greet(ctx: &mut RunContext) -> JobResult {
/// 	let who = ctx.str_arg("who").unwrap_or("world");
/// 	writeln!(ctx, "hello, {who}")?;
/// 	Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct RunContext<'r> {
	out: String,
	err: String,
	kwargs: &'r Kwargs,
}

impl<'r> RunContext<'r> {
	pub(crate) fn new(kwargs: &'r Kwargs) -> Self {
		Self {
			out: String::new(),
			err: String::new(),
			kwargs,
		}
	}

	/// A keyword argument bound at registration.
	pub fn arg(&self, name: &str) -> Option<&Value> {
		self.kwargs.get(name)
	}

	/// A keyword argument, if it is a string.
	pub fn str_arg(&self, name: &str) -> Option<&str> {
		self.arg(name).and_then(Value::as_str)
	}

	/// All keyword arguments.
	pub fn args(&self) -> &Kwargs {
		self.kwargs
	}

	/// Append a line to the run's captured error stream without failing the
	/// run. The monitor surfaces a non-empty error stream as `ERROR`.
	pub fn write_err(&mut self, line: impl fmt::Display) {
		use fmt::Write as _;
		// infallible on a String sink
		let _ = writeln!(self.err, "{line}");
	}

	pub(crate) fn append_err(&mut self, text: &str) {
		if !self.err.is_empty() && !self.err.ends_with('\n') {
			self.err.push('\n');
		}
		self.err.push_str(text);
	}

	pub(crate) fn into_captured(self) -> (String, String) {
		(self.out, self.err)
	}
}

impl fmt::Write for RunContext<'_> {
	fn write_str(&mut self, s: &str) -> fmt::Result {
		self.out.push_str(s);
		Ok(())
	}
}

/// A job is anything that implements this trait.
pub trait Callable: Send + Sync {
	/// Execute this callable.
	fn call(&self, ctx: &mut RunContext) -> JobResult;
	/// Get the name of this callable.
	fn name(&self) -> &str;
}

impl fmt::Debug for dyn Callable {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "Callable(name={})", self.name())
	}
}

/// A named closure.
pub struct FnCallable {
	name: String,
	work: Box<dyn Fn(&mut RunContext) -> JobResult + Send + Sync>,
}

impl FnCallable {
	pub fn new(
		name: &str,
		work: impl Fn(&mut RunContext) -> JobResult + Send + Sync + 'static,
	) -> Self {
		Self {
			name: name.to_string(),
			work: Box::new(work),
		}
	}
}

impl Callable for FnCallable {
	fn call(&self, ctx: &mut RunContext) -> JobResult {
		(self.work)(ctx)
	}

	fn name(&self) -> &str {
		&self.name
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;
	use serde_json::json;
	use std::fmt::Write as _;

	fn kwargs() -> Kwargs {
		let mut map = Kwargs::new();
		map.insert("who".to_string(), json!("world"));
		map
	}

	#[test]
	fn test_captured_output() {
		let kwargs = kwargs();
		let callable = FnCallable::new("greeter", |ctx| {
			let who = ctx.str_arg("who").unwrap_or("nobody").to_string();
			writeln!(ctx, "hello, {who}")?;
			ctx.write_err("grumble");
			Ok(())
		});
		assert_eq!(callable.name(), "greeter");

		let mut ctx = RunContext::new(&kwargs);
		callable.call(&mut ctx).unwrap();
		let (out, err) = ctx.into_captured();
		assert_eq!(out, "hello, world\n");
		assert_eq!(err, "grumble\n");
	}

	#[test]
	fn test_failure_is_returned() {
		let kwargs = Kwargs::new();
		let callable = FnCallable::new("failer", |_ctx| Err("boom".into()));
		let mut ctx = RunContext::new(&kwargs);
		let err = callable.call(&mut ctx).unwrap_err();
		assert_eq!(err.to_string(), "boom");
	}
}

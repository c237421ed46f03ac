// Custom test assertions for integration tests

use alba_demo::process::CommandLine;

/// Assertion result for detailed error messages
#[derive(Debug)]
pub struct AssertionResult {
    pub passed: bool,
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

impl AssertionResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            message: String::new(),
            expected: None,
            actual: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            expected: None,
            actual: None,
        }
    }

    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    pub fn with_actual(mut self, actual: impl Into<String>) -> Self {
        self.actual = Some(actual.into());
        self
    }

    pub fn assert(self) {
        if !self.passed {
            let mut msg = self.message;
            if let Some(expected) = self.expected {
                msg.push_str(&format!("\n  expected: {}", expected));
            }
            if let Some(actual) = self.actual {
                msg.push_str(&format!("\n  actual: {}", actual));
            }
            panic!("{}", msg);
        }
    }
}

/// Assert that no command mentions `needle`.
pub fn assert_never_ran(commands: &[CommandLine], needle: &str) {
    match commands.iter().find(|c| c.mentions(needle)) {
        None => AssertionResult::pass(),
        Some(command) => AssertionResult::fail(format!("`{}` should never run", needle))
            .with_actual(command.to_string()),
    }
    .assert();
}

/// Assert that the first command mentioning `first` precedes the first
/// mentioning `second`.
pub fn assert_ran_before(commands: &[CommandLine], first: &str, second: &str) {
    let position = |needle: &str| commands.iter().position(|c| c.mentions(needle));
    match (position(first), position(second)) {
        (Some(a), Some(b)) if a < b => AssertionResult::pass(),
        (a, b) => AssertionResult::fail("Commands out of order")
            .with_expected(format!("{} before {}", first, second))
            .with_actual(format!("{:?} / {:?}", a, b)),
    }
    .assert();
}

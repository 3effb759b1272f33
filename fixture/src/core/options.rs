//! Run options and the fixture command-line grammar.
//!
//! The grammar is loose: `-v`, `-g <group>`, `-n <name>` and
//! `-r [count]` are recognized, anything else is skipped.

use anyhow::{Context, Result, bail};

/// Repeat count used when `-r` is given without a number.
pub const DEFAULT_REPEAT_WITHOUT_COUNT: u32 = 2;

/// Options that stay fixed for a whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Print each test label and ` PASS` instead of progress dots.
    pub verbose: bool,
    /// Number of times the whole suite is run.
    pub repeat: u32,
    /// Substring a test's group must contain to run.
    pub group_filter: Option<String>,
    /// Substring a test's name must contain to run.
    pub name_filter: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            repeat: 1,
            group_filter: None,
            name_filter: None,
        }
    }
}

/// Apply fixture arguments (program name excluded) on top of `base`.
///
/// `-r` consumes the next token only when it starts with a digit; its leading
/// digits become the repeat count. `-g` and `-n` without a value are errors.
pub fn parse_args<I, S>(args: I, base: RunOptions) -> Result<RunOptions>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let args: Vec<S> = args.into_iter().collect();
    let mut options = base;
    let mut index = 0;
    while index < args.len() {
        match args[index].as_ref() {
            "-v" => {
                options.verbose = true;
                index += 1;
            }
            "-g" => {
                let group = args.get(index + 1).context("-g requires a group name")?;
                options.group_filter = Some(group.as_ref().to_string());
                index += 2;
            }
            "-n" => {
                let name = args.get(index + 1).context("-n requires a test name")?;
                options.name_filter = Some(name.as_ref().to_string());
                index += 2;
            }
            "-r" => {
                options.repeat = DEFAULT_REPEAT_WITHOUT_COUNT;
                index += 1;
                if let Some(token) = args.get(index)
                    && let Some(count) = leading_count(token.as_ref())?
                {
                    options.repeat = count;
                    index += 1;
                }
            }
            _ => index += 1,
        }
    }
    Ok(options)
}

/// Parse the leading decimal digits of `token`, if it starts with one.
fn leading_count(token: &str) -> Result<Option<u32>> {
    let digits: String = token.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Ok(None);
    }
    match digits.parse::<u32>() {
        Ok(count) => Ok(Some(count)),
        Err(_) => bail!("repeat count {} out of range", digits),
    }
}

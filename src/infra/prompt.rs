//! 操作员确认提示

use console::Term;

/// 是/否确认
pub trait Confirm: Send + Sync {
    /// 是否有操作员可以回答
    fn is_interactive(&self) -> bool;
    /// 询问操作员，返回是否继续
    fn confirm(&self, question: &str) -> bool;
}

/// 终端提示（写 stderr，读 stdin）
pub struct ConsolePrompt;

impl Confirm for ConsolePrompt {
    fn is_interactive(&self) -> bool {
        Term::stderr().is_term() && Term::stdout().is_term()
    }

    fn confirm(&self, question: &str) -> bool {
        let term = Term::stderr();
        if term.write_str(&format!("{} [y/N] ", question)).is_err() {
            return false;
        }
        match term.read_line() {
            Ok(answer) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}

/// Lệnh người dùng gõ vào dòng nhập.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    /// `/quit`
    Quit,
    /// `/join <room>`; the room name is trimmed but not validated here.
    Join(String),
    /// Anything else is sent to the current room as-is, including empty lines.
    Send(String),
}

const QUIT: &str = "/quit";
const JOIN_PREFIX: &str = "/join ";

impl UserCommand {
    pub fn parse(line: &str) -> Self {
        if line.eq_ignore_ascii_case(QUIT) {
            return Self::Quit;
        }

        let is_join = line
            .get(..JOIN_PREFIX.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(JOIN_PREFIX));
        if is_join {
            return Self::Join(line[JOIN_PREFIX.len()..].trim().to_string());
        }

        Self::Send(line.to_string())
    }
}

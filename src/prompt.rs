use std::env;
use std::path::Path;

use nix::unistd::{gethostname, getuid, User};

/// `user@host:cwd$ ` for the current process, with `$HOME` shown as `~`.
pub fn render() -> String {
    let user = User::from_uid(getuid())
        .ok()
        .flatten()
        .map(|u| u.name)
        .or_else(|| env::var("USER").ok())
        .unwrap_or_else(|| "?".to_string());
    let host = gethostname()
        .ok()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|| "localhost".to_string());
    let cwd = env::current_dir().unwrap_or_default();
    let home = env::var_os("HOME");
    format_prompt(&user, &host, &cwd, home.as_deref().map(Path::new))
}

pub fn format_prompt(user: &str, host: &str, cwd: &Path, home: Option<&Path>) -> String {
    let shown = match home.and_then(|h| cwd.strip_prefix(h).ok()) {
        Some(rest) if rest.as_os_str().is_empty() => "~".to_string(),
        Some(rest) => format!("~/{}", rest.display()),
        None => cwd.display().to_string(),
    };
    format!("{user}@{host}:{shown}$ ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_is_abbreviated() {
        let home = Path::new("/home/ada");
        assert_eq!(format_prompt("ada", "box", home, Some(home)), "ada@box:~$ ");
        assert_eq!(format_prompt("ada", "box", Path::new("/home/ada/src"), Some(home)), "ada@box:~/src$ ");
    }

    #[test]
    fn other_directories_are_shown_whole() {
        let p = format_prompt("root", "srv", Path::new("/home/adam"), Some(Path::new("/home/ada")));
        assert_eq!(p, "root@srv:/home/adam$ ");
        assert_eq!(format_prompt("root", "srv", Path::new("/tmp"), None), "root@srv:/tmp$ ");
    }
}

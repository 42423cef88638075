//! 프로세스 실행과 경로 처리에 쓰이는 공용 헬퍼

use std::path::{Path, PathBuf};

use tokio::process::Command;

/// Windows에서 자식 프로세스의 콘솔 창을 숨김. 다른 플랫폼에서는 그대로 반환
#[cfg(target_os = "windows")]
pub fn hide_console_window(cmd: &mut Command) -> &mut Command {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x08000000;
    cmd.creation_flags(CREATE_NO_WINDOW)
}

#[cfg(not(target_os = "windows"))]
pub fn hide_console_window(cmd: &mut Command) -> &mut Command {
    cmd
}

/// 상대 경로는 `base` 기준으로 해석
pub fn resolve_under(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_join_base() {
        assert_eq!(
            resolve_under(Path::new("/data/lu"), Path::new("server.py")),
            PathBuf::from("/data/lu/server.py")
        );
        let abs = std::env::temp_dir().join("req.txt");
        assert_eq!(resolve_under(Path::new("/data/lu"), &abs), abs);
    }
}

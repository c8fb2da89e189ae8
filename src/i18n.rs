/// Localized labels for the `orange-watch` front end.
/// Locale can be selected via the `--locale` CLI flag (e.g. `--locale zh`).
use crate::core::model::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    En,
    Zh,
}

impl Locale {
    pub fn from_str(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "zh" | "zh-cn" | "zh_cn" | "zh-hans" | "zh-tw" | "zh_tw" => Self::Zh,
            _ => Self::En,
        }
    }
}

pub struct Messages {
    pub job_created: &'static str,
    pub watching: &'static str,
    pub job_succeeded: &'static str,
    pub job_failed: &'static str,
    pub connection_closed_note: &'static str,
    pub playlist_label: &'static str,
    pub location_label: &'static str,
    pub eta_unknown: &'static str,
    pub total_unknown: &'static str,
    pub error_prefix: &'static str,
    pub info_prefix: &'static str,
    pub job_prefix: &'static str,
    statuses: StatusLabels,
}

struct StatusLabels {
    starting: &'static str,
    downloading: &'static str,
    processing: &'static str,
    downloading_video: &'static str,
    video_completed: &'static str,
    video_failed: &'static str,
    completed: &'static str,
    playlist_completed: &'static str,
    failed: &'static str,
    error: &'static str,
    end: &'static str,
}

pub static EN: Messages = Messages {
    job_created: "Job created",
    watching: "Watching",
    job_succeeded: "Completed",
    job_failed: "Failed",
    connection_closed_note: "stream closed without a final status; assuming success",
    playlist_label: "videos",
    location_label: "Saved to",
    eta_unknown: "-",
    total_unknown: "?",
    error_prefix: "ERR",
    info_prefix: "INFO",
    job_prefix: "JOB",
    statuses: StatusLabels {
        starting: "Starting...",
        downloading: "Downloading...",
        processing: "Processing...",
        downloading_video: "Downloading Video...",
        video_completed: "Video Completed",
        video_failed: "Video Failed",
        completed: "Completed",
        playlist_completed: "Playlist Completed",
        failed: "Failed",
        error: "Error",
        end: "Stream Ended",
    },
};

pub static ZH: Messages = Messages {
    job_created: "任务已创建",
    watching: "正在跟踪",
    job_succeeded: "已完成",
    job_failed: "失败",
    connection_closed_note: "连接已关闭且未收到最终状态，按成功处理",
    playlist_label: "个视频",
    location_label: "保存位置",
    eta_unknown: "-",
    total_unknown: "?",
    error_prefix: "错误",
    info_prefix: "信息",
    job_prefix: "任务",
    statuses: StatusLabels {
        starting: "正在启动...",
        downloading: "正在下载...",
        processing: "正在处理...",
        downloading_video: "正在下载视频...",
        video_completed: "视频已完成",
        video_failed: "视频失败",
        completed: "已完成",
        playlist_completed: "播放列表已完成",
        failed: "失败",
        error: "错误",
        end: "流已结束",
    },
};

pub fn get_messages(locale: Locale) -> &'static Messages {
    match locale {
        Locale::En => &EN,
        Locale::Zh => &ZH,
    }
}

impl Messages {
    /// Display label for a job status. Unknown statuses are shown as sent.
    pub fn status_label<'a>(&'a self, status: &'a JobStatus) -> &'a str {
        let s = &self.statuses;
        match status {
            JobStatus::Starting => s.starting,
            JobStatus::Downloading => s.downloading,
            JobStatus::Processing => s.processing,
            JobStatus::DownloadingVideo => s.downloading_video,
            JobStatus::VideoCompleted => s.video_completed,
            JobStatus::VideoFailed => s.video_failed,
            JobStatus::Completed => s.completed,
            JobStatus::PlaylistCompleted => s.playlist_completed,
            JobStatus::Failed => s.failed,
            JobStatus::Error => s.error,
            JobStatus::End => s.end,
            JobStatus::Other(raw) => raw,
        }
    }
}

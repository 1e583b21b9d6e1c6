//! Inbound media extraction for the Telegram adapter.
//!
//! Downloads Telegram media via `get_file` + `download_file` and hands the
//! raw bytes to `relay_agent::MediaIngest` as an `InboundMedia` — unlike the
//! teacher's `skynet-telegram::attach`, this crate never inlines bytes as a
//! base64 block itself; Media Ingest owns the routing (image vs. upload vs.
//! transcription) once the bytes are in hand.

use teloxide::net::Download;
use teloxide::prelude::*;
use tracing::warn;

use relay_agent::{kind_from_mime, InboundMedia};

/// Extract the first supported attachment from an inbound message, if any.
///
/// Returns `None` when the message has no supported media, when `get_file`
/// fails, or when the file exceeds `max_bytes`.
pub async fn extract_media(bot: &Bot, msg: &Message, max_bytes: u64) -> Option<InboundMedia> {
    if let Some(photos) = msg.photo() {
        if let Some(photo) = photos.last() {
            return download(bot, &photo.file.id, "image/jpeg", None, None, max_bytes).await;
        }
    }
    if let Some(doc) = msg.document() {
        let mime = doc.mime_type.as_ref().map(|m| m.to_string()).unwrap_or_else(|| "application/octet-stream".into());
        let filename = doc.file_name.clone();
        return download(bot, &doc.file.id, &mime, filename, None, max_bytes).await;
    }
    if let Some(video) = msg.video() {
        let mime = video.mime_type.as_ref().map(|m| m.to_string()).unwrap_or_else(|| "video/mp4".into());
        let duration = Some(video.duration.seconds() as f64);
        return download(bot, &video.file.id, &mime, video.file_name.clone(), duration, max_bytes).await;
    }
    if let Some(audio) = msg.audio() {
        let mime = audio.mime_type.as_ref().map(|m| m.to_string()).unwrap_or_else(|| "audio/mpeg".into());
        let duration = Some(audio.duration.seconds() as f64);
        return download(bot, &audio.file.id, &mime, audio.file_name.clone(), duration, max_bytes).await;
    }
    if let Some(voice) = msg.voice() {
        let mime = voice.mime_type.as_ref().map(|m| m.to_string()).unwrap_or_else(|| "audio/ogg".into());
        let duration = Some(voice.duration.seconds() as f64);
        return download(bot, &voice.file.id, &mime, None, duration, max_bytes).await;
    }
    if let Some(note) = msg.video_note() {
        let duration = Some(note.duration.seconds() as f64);
        return download(bot, &note.file.id, "video/mp4", None, duration, max_bytes).await;
    }
    None
}

async fn download(
    bot: &Bot,
    file_id: &str,
    mime: &str,
    filename: Option<String>,
    duration_seconds: Option<f64>,
    max_bytes: u64,
) -> Option<InboundMedia> {
    let file = match bot.get_file(file_id).await {
        Ok(f) => f,
        Err(e) => {
            warn!(file_id, error = %e, "Telegram: get_file failed");
            return None;
        }
    };

    if u64::from(file.size) > max_bytes {
        warn!(file_id, size = file.size, limit = max_bytes, "Telegram: file exceeds size limit, skipping");
        return None;
    }

    let mut buf: Vec<u8> = Vec::new();
    if let Err(e) = bot.download_file(&file.path, &mut buf).await {
        warn!(file_id, error = %e, "Telegram: download_file failed");
        return None;
    }

    Some(InboundMedia {
        bytes: buf,
        mime: mime.to_string(),
        filename,
        kind: kind_from_mime(mime),
        duration_seconds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_guard_boundary() {
        let max: u64 = 20 * 1024 * 1024;
        assert!(max - 1 < max);
        assert!(max > max - 1);
    }
}

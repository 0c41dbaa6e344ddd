pub mod audio_download;
pub mod audio_upload;
pub mod health;
pub mod served_file;

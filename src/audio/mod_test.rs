use super::*;

#[test]
fn test_pcm16_normalization() {
    assert_eq!(pcm16_to_f32(0), 0.0);
    assert_eq!(pcm16_to_f32(i16::MIN), -1.0);
    assert_eq!(pcm16_to_f32(16384), 0.5);
    assert!(pcm16_to_f32(i16::MAX) < 1.0);
}

#[test]
fn test_chunk_from_pcm16() {
    let chunk = AudioChunk::from_pcm16(&[0, -32768, 16384], 77);
    assert_eq!(chunk.samples, vec![0.0, -1.0, 0.5]);
    assert_eq!(chunk.timestamp_ms, 77);
    assert_eq!(chunk.len(), 3);
}

#[test]
fn test_chunk_duration() {
    let chunk = AudioChunk::new(vec![0.0; 480], 0);
    assert_eq!(chunk.duration_ms(16000), 30);
    assert_eq!(chunk.duration_ms(0), 0);
}

#[test]
fn test_assembler_emits_fixed_chunks() {
    let mut assembler = ChunkAssembler::new(4);
    let mut chunks = Vec::new();

    assembler.push(&[1.0, 2.0, 3.0], 10, |c| chunks.push(c));
    assert!(chunks.is_empty());
    assert_eq!(assembler.pending_len(), 3);

    assembler.push(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0], 20, |c| chunks.push(c));
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].samples, vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(chunks[1].samples, vec![5.0, 6.0, 7.0, 8.0]);
    assert_eq!(chunks[1].timestamp_ms, 20);
    assert_eq!(assembler.pending_len(), 1);

    let rest = assembler.flush(30).unwrap();
    assert_eq!(rest.samples, vec![9.0]);
    assert!(assembler.flush(40).is_none());
}

#[test]
fn test_assembler_default_is_thirty_ms() {
    assert_eq!(ChunkAssembler::default().chunk_samples(), 480);
}

#[test]
fn test_downmix_averages_channels() {
    let stereo = [1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
    assert_eq!(downmix_to_mono(&stereo, 2), vec![0.5, 0.5, 0.0]);
    assert_eq!(downmix_to_mono(&[0.1, 0.2], 1), vec![0.1, 0.2]);
}

#[test]
fn test_capture_error_display() {
    assert_eq!(
        AudioCaptureError::PermissionDenied.to_string(),
        "Microphone permission denied"
    );
    assert!(AudioCaptureError::UnsupportedFormat("24-bit".into())
        .to_string()
        .contains("24-bit"));
}

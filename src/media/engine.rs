use super::{
    build_dialogue_ssml, clean_for_tts, content_key, image_query, is_dialogue, ImageSource,
    MediaConfig, SpeechSynthesizer,
};
use crate::config::ForceFlags;
use crate::error::Result;
use crate::models::{ImageOrigin, QuoteRecord, VocabularyPatch, VocabularyRecord};
use crate::storage::{object_key_from_url, ObjectStore};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Fans the per-field media adapters out over one record and merges their
/// results into a single patch.
///
/// Every adapter is independently failable: an adapter that has nothing to
/// do (field populated, no force) or whose output is undersized contributes
/// nothing; an adapter that fails outright turns the whole call into an
/// error after its siblings have finished, so the caller can classify it.
pub struct MediaEngine {
    objects: Arc<dyn ObjectStore>,
    tts: Arc<dyn SpeechSynthesizer>,
    images: Arc<dyn ImageSource>,
    config: MediaConfig,
}

impl MediaEngine {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        tts: Arc<dyn SpeechSynthesizer>,
        images: Arc<dyn ImageSource>,
        config: MediaConfig,
    ) -> Self {
        Self {
            objects,
            tts,
            images,
            config,
        }
    }

    /// Run all vocabulary adapters concurrently and merge the non-empty
    /// per-field results. The patch keys are exactly the union of what the
    /// adapters produced.
    pub async fn enrich_vocabulary(
        &self,
        record: &VocabularyRecord,
        force: ForceFlags,
    ) -> Result<VocabularyPatch> {
        let (primary, secondary, example, image) = futures::join!(
            self.primary_audio(record, force.audio),
            self.secondary_audio(record, force.audio),
            self.example_audio(record, force.audio),
            self.word_image(record, force.images),
        );

        let mut patch = VocabularyPatch::default();
        let mut failure = None;

        match primary {
            Ok(url) => patch.audio_url = url,
            Err(e) => failure = Some(e),
        }
        match secondary {
            Ok(url) => patch.audio_alt_url = url,
            Err(e) => {
                if failure.is_none() {
                    failure = Some(e);
                }
            }
        }
        match example {
            Ok(url) => patch.example_audio_url = url,
            Err(e) => {
                if failure.is_none() {
                    failure = Some(e);
                }
            }
        }
        match image {
            Ok(Some((url, origin))) => {
                patch.image_url = Some(url);
                patch.image_origin = Some(origin);
            }
            Ok(None) => {}
            Err(e) => {
                if failure.is_none() {
                    failure = Some(e);
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(patch),
        }
    }

    /// Quote analogue of [`enrich_vocabulary`]: one audio field.
    pub async fn enrich_quote(&self, quote: &QuoteRecord, force: bool) -> Result<Option<String>> {
        if quote.audio_url.is_some() && !force {
            return Ok(None);
        }
        let speakable = clean_for_tts(&quote.text);
        if speakable.is_empty() {
            return Ok(None);
        }

        let bytes = self
            .tts
            .synthesize(&speakable, &self.config.primary_voice)
            .await?;
        let key = format!("quote_{}.mp3", content_key(&quote.text));
        self.store_audio(bytes, key, quote.audio_url.as_deref())
            .await
    }

    async fn primary_audio(&self, record: &VocabularyRecord, force: bool) -> Result<Option<String>> {
        if record.audio_url.is_some() && !force {
            return Ok(None);
        }
        let speakable = clean_for_tts(&record.word);
        if speakable.is_empty() {
            return Ok(None);
        }

        let bytes = self
            .tts
            .synthesize(&speakable, &self.config.primary_voice)
            .await?;
        let key = format!("{}.mp3", content_key(&record.word));
        let stored = self
            .store_audio(bytes, key, record.audio_url.as_deref())
            .await?;
        if stored.is_some() {
            info!(word = %record.word, "Primary audio synthesized");
        }
        Ok(stored)
    }

    async fn secondary_audio(
        &self,
        record: &VocabularyRecord,
        force: bool,
    ) -> Result<Option<String>> {
        if record.audio_alt_url.is_some() && !force {
            return Ok(None);
        }
        let speakable = clean_for_tts(&record.word);
        if speakable.is_empty() {
            return Ok(None);
        }

        let bytes = self
            .tts
            .synthesize(&speakable, &self.config.secondary_voice)
            .await?;
        let key = format!("{}_alt.mp3", content_key(&record.word));
        let stored = self
            .store_audio(bytes, key, record.audio_alt_url.as_deref())
            .await?;
        if stored.is_some() {
            info!(word = %record.word, "Secondary audio synthesized");
        }
        Ok(stored)
    }

    async fn example_audio(&self, record: &VocabularyRecord, force: bool) -> Result<Option<String>> {
        let Some(example) = record.example.as_deref() else {
            return Ok(None);
        };
        if example.trim().is_empty() {
            return Ok(None);
        }
        if record.example_audio_url.is_some() && !force {
            return Ok(None);
        }

        let bytes = if is_dialogue(example) {
            match build_dialogue_ssml(
                example,
                &self.config.primary_voice,
                &self.config.secondary_voice,
            ) {
                Some(ssml) => self.tts.synthesize_ssml(&ssml).await?,
                None => return Ok(None),
            }
        } else {
            let speakable = clean_for_tts(example);
            if speakable.is_empty() {
                return Ok(None);
            }
            self.tts
                .synthesize(&speakable, &self.config.primary_voice)
                .await?
        };

        let key = format!("ex_{}.mp3", content_key(example));
        let stored = self
            .store_audio(bytes, key, record.example_audio_url.as_deref())
            .await?;
        if stored.is_some() {
            info!(word = %record.word, "Example audio synthesized");
        }
        Ok(stored)
    }

    async fn word_image(
        &self,
        record: &VocabularyRecord,
        force: bool,
    ) -> Result<Option<(String, ImageOrigin)>> {
        if record.image_url.is_some() {
            // User uploads are off limits, force or not.
            if matches!(record.image_origin, Some(ImageOrigin::UserProvided)) {
                return Ok(None);
            }
            if !force {
                return Ok(None);
            }
        }

        let Some(translation) = record.translation.as_deref() else {
            return Ok(None);
        };
        let query = image_query(translation);
        if query.is_empty() {
            return Ok(None);
        }

        let raw = self.images.search(&query).await?;
        let optimized = optimize_jpeg(raw).await;
        if optimized.len() < self.config.min_media_bytes {
            warn!(word = %record.word, size = optimized.len(), "Fetched image below minimum size, skipping");
            return Ok(None);
        }

        self.delete_old(&self.config.image_bucket, record.image_url.as_deref())
            .await;
        let key = format!("{}.jpg", content_key(&record.word));
        self.objects
            .upload(&self.config.image_bucket, &key, optimized, "image/jpeg")
            .await?;
        info!(word = %record.word, "Image fetched and stored");
        Ok(Some((
            self.objects.public_url(&self.config.image_bucket, &key),
            ImageOrigin::Generated,
        )))
    }

    async fn store_audio(
        &self,
        bytes: Vec<u8>,
        key: String,
        old_url: Option<&str>,
    ) -> Result<Option<String>> {
        if bytes.len() < self.config.min_media_bytes {
            warn!(key, size = bytes.len(), "Synthesized audio below minimum size, skipping");
            return Ok(None);
        }

        self.delete_old(&self.config.audio_bucket, old_url).await;
        self.objects
            .upload(&self.config.audio_bucket, &key, bytes, "audio/mpeg")
            .await?;
        Ok(Some(self.objects.public_url(&self.config.audio_bucket, &key)))
    }

    /// Best effort: a replacement is about to land under a deterministic
    /// key, so a failed delete of the previous object is only worth a
    /// warning.
    async fn delete_old(&self, bucket: &str, old_url: Option<&str>) {
        let Some(url) = old_url else { return };
        let Some(key) = object_key_from_url(url) else {
            return;
        };
        match self.objects.remove(bucket, &[key.clone()]).await {
            Ok(()) => debug!(key, "Deleted previous object"),
            Err(e) => warn!(key, "Failed to delete previous object: {e}"),
        }
    }
}

/// Re-encode fetched image bytes as JPEG off the event loop. Undecodable
/// input passes through unchanged; a failed task yields empty bytes, which
/// the caller discards as undersized.
async fn optimize_jpeg(data: Vec<u8>) -> Vec<u8> {
    match tokio::task::spawn_blocking(move || reencode_jpeg(data)).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Image re-encode task failed: {e}");
            Vec::new()
        }
    }
}

fn reencode_jpeg(data: Vec<u8>) -> Vec<u8> {
    let decoded = match image::load_from_memory(&data) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!("Could not decode image ({e}), keeping original bytes");
            return data;
        }
    };
    let rgb = decoded.to_rgb8();
    let mut out = std::io::Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 80);
    match rgb.write_with_encoder(encoder) {
        Ok(()) => out.into_inner(),
        Err(e) => {
            warn!("JPEG re-encode failed ({e}), keeping original bytes");
            data
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;
    use crate::storage::ObjectEntry;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    struct MockObjects {
        uploads: Mutex<Vec<(String, String)>>,
        removed: Mutex<Vec<String>>,
    }

    impl MockObjects {
        fn new() -> Self {
            Self {
                uploads: Mutex::new(Vec::new()),
                removed: Mutex::new(Vec::new()),
            }
        }

        fn upload_count(&self) -> usize {
            self.uploads.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ObjectStore for MockObjects {
        async fn ensure_bucket(&self, _bucket: &str) -> Result<()> {
            Ok(())
        }

        async fn list(&self, _bucket: &str, _limit: usize, _offset: usize) -> Result<Vec<ObjectEntry>> {
            Ok(Vec::new())
        }

        async fn upload(
            &self,
            bucket: &str,
            key: &str,
            _bytes: Vec<u8>,
            _content_type: &str,
        ) -> Result<()> {
            self.uploads
                .lock()
                .unwrap()
                .push((bucket.to_string(), key.to_string()));
            Ok(())
        }

        async fn remove(&self, _bucket: &str, keys: &[String]) -> Result<()> {
            self.removed.lock().unwrap().extend(keys.iter().cloned());
            Ok(())
        }

        fn public_url(&self, bucket: &str, key: &str) -> String {
            format!("https://cdn.test/{bucket}/{key}")
        }
    }

    struct MockTts {
        text_calls: AtomicUsize,
        ssml_calls: AtomicUsize,
        payload: usize,
        fail: bool,
    }

    impl MockTts {
        fn of_size(payload: usize) -> Self {
            Self {
                text_calls: AtomicUsize::new(0),
                ssml_calls: AtomicUsize::new(0),
                payload,
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::of_size(0)
            }
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for MockTts {
        async fn synthesize(&self, _text: &str, _voice: &str) -> Result<Vec<u8>> {
            self.text_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(WorkerError::Synthesis("mock failure".into()));
            }
            Ok(vec![0u8; self.payload])
        }

        async fn synthesize_ssml(&self, _ssml: &str) -> Result<Vec<u8>> {
            self.ssml_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(WorkerError::Synthesis("mock failure".into()));
            }
            Ok(vec![0u8; self.payload])
        }
    }

    struct MockImages {
        calls: AtomicUsize,
        payload: usize,
    }

    impl MockImages {
        fn of_size(payload: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                payload,
            }
        }
    }

    #[async_trait]
    impl ImageSource for MockImages {
        async fn search(&self, _query: &str) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0u8; self.payload])
        }
    }

    fn config() -> MediaConfig {
        MediaConfig {
            audio_bucket: "audio-files".into(),
            image_bucket: "image-files".into(),
            primary_voice: "voice-f".into(),
            secondary_voice: "voice-m".into(),
            min_media_bytes: 100,
        }
    }

    fn record() -> VocabularyRecord {
        VocabularyRecord {
            id: Uuid::new_v4(),
            word: "사과".into(),
            translation: Some("apple".into()),
            hanja: None,
            topic: Some("Food".into()),
            category: Some("Noun".into()),
            level: Some("beginner".into()),
            kind: Some("word".into()),
            example: Some("사과를 먹어요.".into()),
            example_translation: Some("I eat an apple.".into()),
            synonyms: None,
            antonyms: None,
            collocations: None,
            grammar_note: None,
            audio_url: None,
            audio_alt_url: None,
            example_audio_url: None,
            image_url: None,
            image_origin: None,
            user_id: None,
            created_at: Utc::now(),
        }
    }

    fn engine(objects: Arc<MockObjects>, tts: Arc<MockTts>, images: Arc<MockImages>) -> MediaEngine {
        MediaEngine::new(objects, tts, images, config())
    }

    #[tokio::test]
    async fn missing_secondary_audio_patches_only_that_field() {
        let objects = Arc::new(MockObjects::new());
        let tts = Arc::new(MockTts::of_size(4096));
        let images = Arc::new(MockImages::of_size(4096));

        let mut row = record();
        row.audio_url = Some("https://cdn.test/audio-files/a.mp3".into());
        row.example_audio_url = Some("https://cdn.test/audio-files/ex_a.mp3".into());
        row.image_url = Some("https://cdn.test/image-files/a.jpg".into());
        row.image_origin = Some(ImageOrigin::Generated);

        let patch = engine(objects.clone(), tts.clone(), images.clone())
            .enrich_vocabulary(&row, ForceFlags::default())
            .await
            .unwrap();

        assert_eq!(patch.columns(), vec!["audio_alt_url"]);
        assert_eq!(tts.text_calls.load(Ordering::SeqCst), 1);
        assert_eq!(tts.ssml_calls.load(Ordering::SeqCst), 0);
        assert_eq!(images.calls.load(Ordering::SeqCst), 0);
        assert_eq!(objects.upload_count(), 1);
    }

    #[tokio::test]
    async fn fully_populated_record_makes_no_vendor_calls() {
        let objects = Arc::new(MockObjects::new());
        let tts = Arc::new(MockTts::of_size(4096));
        let images = Arc::new(MockImages::of_size(4096));

        let mut row = record();
        row.audio_url = Some("u1".into());
        row.audio_alt_url = Some("u2".into());
        row.example_audio_url = Some("u3".into());
        row.image_url = Some("u4".into());
        row.image_origin = Some(ImageOrigin::Generated);

        let patch = engine(objects.clone(), tts.clone(), images.clone())
            .enrich_vocabulary(&row, ForceFlags::default())
            .await
            .unwrap();

        assert!(patch.is_empty());
        assert_eq!(tts.text_calls.load(Ordering::SeqCst), 0);
        assert_eq!(tts.ssml_calls.load(Ordering::SeqCst), 0);
        assert_eq!(images.calls.load(Ordering::SeqCst), 0);
        assert_eq!(objects.upload_count(), 0);
    }

    #[tokio::test]
    async fn undersized_audio_is_a_silent_skip() {
        let objects = Arc::new(MockObjects::new());
        let tts = Arc::new(MockTts::of_size(10));
        let images = Arc::new(MockImages::of_size(4096));

        let mut row = record();
        row.example = None;
        row.image_url = Some("u".into());
        row.image_origin = Some(ImageOrigin::Generated);

        let patch = engine(objects.clone(), tts, images)
            .enrich_vocabulary(&row, ForceFlags::default())
            .await
            .unwrap();

        assert!(patch.is_empty());
        assert_eq!(objects.upload_count(), 0);
    }

    #[tokio::test]
    async fn dialogue_examples_render_through_ssml() {
        let objects = Arc::new(MockObjects::new());
        let tts = Arc::new(MockTts::of_size(4096));
        let images = Arc::new(MockImages::of_size(4096));

        let mut row = record();
        row.audio_url = Some("u1".into());
        row.audio_alt_url = Some("u2".into());
        row.image_url = Some("u4".into());
        row.image_origin = Some(ImageOrigin::Generated);
        row.example = Some("가: 사과 좋아해요?\n나: 네, 좋아해요.".into());

        let patch = engine(objects, tts.clone(), images)
            .enrich_vocabulary(&row, ForceFlags::default())
            .await
            .unwrap();

        assert_eq!(patch.columns(), vec!["example_audio_url"]);
        assert_eq!(tts.ssml_calls.load(Ordering::SeqCst), 1);
        assert_eq!(tts.text_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn user_provided_images_survive_force() {
        let objects = Arc::new(MockObjects::new());
        let tts = Arc::new(MockTts::of_size(4096));
        let images = Arc::new(MockImages::of_size(4096));

        let mut row = record();
        row.audio_url = Some("u1".into());
        row.audio_alt_url = Some("u2".into());
        row.example_audio_url = Some("u3".into());
        row.image_url = Some("https://cdn.test/image-files/mine.jpg".into());
        row.image_origin = Some(ImageOrigin::UserProvided);

        let patch = engine(objects, tts, images.clone())
            .enrich_vocabulary(
                &row,
                ForceFlags {
                    images: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(patch.is_empty());
        assert_eq!(images.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn adapter_failure_fails_the_aggregate_after_siblings_finish() {
        let objects = Arc::new(MockObjects::new());
        let tts = Arc::new(MockTts::failing());
        let images = Arc::new(MockImages::of_size(4096));

        let row = record();
        let result = engine(objects.clone(), tts, images.clone())
            .enrich_vocabulary(&row, ForceFlags::default())
            .await;

        assert!(result.is_err());
        // The image adapter still ran to completion and stored its object.
        assert_eq!(images.calls.load(Ordering::SeqCst), 1);
        assert_eq!(objects.upload_count(), 1);
    }

    #[tokio::test]
    async fn forced_quote_regeneration_replaces_the_old_object() {
        let objects = Arc::new(MockObjects::new());
        let tts = Arc::new(MockTts::of_size(4096));
        let images = Arc::new(MockImages::of_size(4096));

        let quote = QuoteRecord {
            id: Uuid::new_v4(),
            text: "시작이 반이다".into(),
            audio_url: Some("https://cdn.test/audio-files/quote_old.mp3".into()),
        };

        let engine = engine(objects.clone(), tts, images);
        let url = engine.enrich_quote(&quote, true).await.unwrap();

        assert!(url.is_some());
        assert_eq!(objects.removed.lock().unwrap().as_slice(), ["quote_old.mp3"]);
        assert_eq!(objects.upload_count(), 1);
    }

    #[tokio::test]
    async fn populated_quote_without_force_is_untouched() {
        let objects = Arc::new(MockObjects::new());
        let tts = Arc::new(MockTts::of_size(4096));
        let images = Arc::new(MockImages::of_size(4096));

        let quote = QuoteRecord {
            id: Uuid::new_v4(),
            text: "시작이 반이다".into(),
            audio_url: Some("https://cdn.test/audio-files/quote_old.mp3".into()),
        };

        let engine = engine(objects.clone(), tts.clone(), images);
        assert!(engine.enrich_quote(&quote, false).await.unwrap().is_none());
        assert_eq!(tts.text_calls.load(Ordering::SeqCst), 0);
    }
}

//! Text Chunking Module
//!
//! 교과서 본문을 검색 단위 청크로 분할합니다. 문단 경계를 우선으로,
//! 과도하게 긴 문단은 문장 경계에서 나눕니다. 헤딩은 뒤따르는
//! 문단에 붙여 맥락을 유지합니다.

use regex::Regex;

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// 최소 청크 크기 (문자 수)
    pub min_characters: usize,
    /// 최대 청크 크기 (문자 수)
    pub max_characters: usize,
    /// 오버랩 크기 (문자 수)
    pub overlap_characters: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        // 교과서 산문 검색에 맞춘 값
        Self {
            min_characters: 300,
            max_characters: 1500,
            overlap_characters: 150,
        }
    }
}

impl ChunkConfig {
    /// 오버랩 없는 설정 (인덱스 크기 최소화)
    pub fn compact() -> Self {
        Self {
            min_characters: 500,
            max_characters: 1000,
            overlap_characters: 0,
        }
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// TextbookChunker
// ============================================================================

/// 교과서 청커
///
/// - 헤딩(`#`, "12.3 절 제목" 형태)은 뒤따르는 문단에 붙임
/// - 문단(빈 줄) 경계 우선
/// - 긴 문단은 문장 경계에서 분할
/// - 작은 청크는 인접 청크와 병합
/// - 오버랩은 이전 청크의 꼬리를 단어 경계에서 이어붙임
pub struct TextbookChunker {
    config: ChunkConfig,
}

impl TextbookChunker {
    /// 설정으로 생성
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// 기본 설정으로 생성
    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    /// 본문을 문단 목록으로 분할 (헤딩은 다음 문단에 붙임)
    fn split_paragraphs(&self, text: &str) -> Vec<String> {
        let mut paragraphs = Vec::new();
        let mut pending_heading: Option<String> = None;

        for raw in text.split("\n\n") {
            let block = raw.trim();
            if block.is_empty() {
                continue;
            }

            if is_heading(block) {
                // 연속 헤딩은 하나로 모음
                pending_heading = Some(match pending_heading.take() {
                    Some(prev) => format!("{}\n{}", prev, block),
                    None => block.to_string(),
                });
                continue;
            }

            match pending_heading.take() {
                Some(heading) => paragraphs.push(format!("{}\n\n{}", heading, block)),
                None => paragraphs.push(block.to_string()),
            }
        }

        // 본문 없이 끝난 헤딩
        if let Some(heading) = pending_heading {
            paragraphs.push(heading);
        }

        paragraphs
    }

    /// 문단들을 최대 크기 이하의 청크로 조립
    fn assemble_chunks(&self, paragraphs: Vec<String>) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current = String::new();

        for para in paragraphs {
            // 문단 자체가 최대 크기를 넘으면 문장 단위로 분할
            if para.chars().count() > self.config.max_characters {
                if !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                }
                chunks.extend(self.split_long_paragraph(&para));
                continue;
            }

            let would_be = if current.is_empty() {
                para.chars().count()
            } else {
                current.chars().count() + 2 + para.chars().count()
            };

            if would_be > self.config.max_characters && !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }

            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(&para);
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
    }

    /// 긴 문단을 문장 경계에서 분할
    fn split_long_paragraph(&self, para: &str) -> Vec<String> {
        let sentences = split_sentences(para);

        let mut chunks = Vec::new();
        let mut current = String::new();

        for sentence in sentences {
            let sentence_len = sentence.chars().count();

            // 문장 하나가 최대 크기를 넘으면 단어 단위로 강제 분할
            if sentence_len > self.config.max_characters {
                if !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                }
                chunks.extend(split_words(sentence, self.config.max_characters));
                continue;
            }

            if !current.is_empty()
                && current.chars().count() + 1 + sentence_len > self.config.max_characters
            {
                chunks.push(std::mem::take(&mut current));
            }

            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(sentence);
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
    }

    /// 작은 청크를 인접 청크와 병합
    fn merge_small_chunks(&self, chunks: Vec<String>) -> Vec<String> {
        if self.config.min_characters == 0 {
            return chunks;
        }

        let mut result: Vec<String> = Vec::new();

        for chunk in chunks {
            if let Some(last) = result.last_mut() {
                if last.chars().count() < self.config.min_characters
                    && last.chars().count() + chunk.chars().count() + 2
                        <= self.config.max_characters
                {
                    last.push_str("\n\n");
                    last.push_str(&chunk);
                    continue;
                }
            }
            result.push(chunk);
        }

        result
    }

    /// 오버랩 적용: 이전 청크의 꼬리를 단어 경계에서 이어붙임
    ///
    /// 청크 텍스트는 그대로 LLM 프롬프트에 들어가므로 구분자 없이
    /// 자연스러운 텍스트로 잇습니다.
    fn apply_overlap(&self, chunks: Vec<String>) -> Vec<String> {
        if self.config.overlap_characters == 0 || chunks.len() < 2 {
            return chunks;
        }

        let mut result = Vec::with_capacity(chunks.len());

        for (i, chunk) in chunks.iter().enumerate() {
            if i == 0 {
                result.push(chunk.clone());
                continue;
            }

            let prev = &chunks[i - 1];
            let tail_start = prev.len().saturating_sub(self.config.overlap_characters);
            let tail_start = floor_char_boundary(prev, tail_start);

            // 단어 중간에서 시작하지 않도록 다음 공백까지 전진
            let tail = &prev[tail_start..];
            let word_start = tail
                .find(char::is_whitespace)
                .map(|p| tail_start + p + 1)
                .unwrap_or(tail_start);

            let overlap = prev[word_start..].trim();

            if overlap.chars().count() > 20 {
                result.push(format!("{}\n{}", overlap, chunk));
            } else {
                result.push(chunk.clone());
            }
        }

        result
    }
}

impl Chunker for TextbookChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return vec![];
        }

        let paragraphs = self.split_paragraphs(text);
        let chunks = self.assemble_chunks(paragraphs);
        let chunks = self.merge_small_chunks(chunks);
        self.apply_overlap(chunks)
    }

    fn name(&self) -> &'static str {
        "TextbookChunker"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 블록이 헤딩인지 판별
///
/// Markdown 헤딩(`# ...`) 또는 "12.3 Electric Potential" 형태의
/// 절 번호로 시작하는 한 줄짜리 짧은 블록을 헤딩으로 봅니다.
fn is_heading(block: &str) -> bool {
    if block.lines().count() != 1 || block.chars().count() >= 80 {
        return false;
    }

    if block.starts_with('#') {
        return true;
    }

    let section_re = Regex::new(r"^\d+(\.\d+)*\.?\s+\S").expect("Invalid regex");
    section_re.is_match(block) && !block.ends_with('.')
}

/// 텍스트를 문장 단위로 분할
///
/// 문장 부호(. ? !) 뒤에 공백이 오는 지점을 경계로 봅니다.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;

    let chars: Vec<(usize, char)> = text.char_indices().collect();

    for i in 0..chars.len() {
        let (idx, ch) = chars[i];
        if !matches!(ch, '.' | '?' | '!') {
            continue;
        }

        let followed_by_space = chars
            .get(i + 1)
            .map(|(_, next)| next.is_whitespace())
            .unwrap_or(false);

        if followed_by_space {
            let end = idx + ch.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }

    sentences
}

/// 단어 단위 강제 분할 (문장 경계가 없는 극단적 입력용)
fn split_words(text: &str, max_characters: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if !current.is_empty()
            && current.chars().count() + 1 + word.chars().count() > max_characters
        {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// UTF-8 경계 조정 (인덱스 이하로)
#[inline]
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        s.len()
    } else {
        let mut i = index;
        while i > 0 && !s.is_char_boundary(i) {
            i -= 1;
        }
        i
    }
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 기본 청커 생성
pub fn default_chunker() -> Box<dyn Chunker> {
    Box::new(TextbookChunker::with_defaults())
}

// ============================================================================
// Tests
// ============================================================================

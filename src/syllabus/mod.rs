//! 교육과정 모듈 - 과목 및 단원 정의
//!
//! Class 12 PCB (Physics/Chemistry/Biology) 교과서의 과목과 단원 목록,
//! 그리고 키워드 기반 단원 매칭을 제공합니다.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// Subject
// ============================================================================

/// 과목
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subject {
    Biology,
    Chemistry,
    Physics,
}

impl Subject {
    /// 전체 과목 목록
    pub const ALL: [Subject; 3] = [Subject::Biology, Subject::Chemistry, Subject::Physics];

    /// 저장소 파티션 키로 사용하는 소문자 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Subject::Biology => "biology",
            Subject::Chemistry => "chemistry",
            Subject::Physics => "physics",
        }
    }

    /// 표시용 이름 (첫 글자 대문자)
    pub fn title(&self) -> &'static str {
        match self {
            Subject::Biology => "Biology",
            Subject::Chemistry => "Chemistry",
            Subject::Physics => "Physics",
        }
    }

    /// 과목의 단원 목록
    pub fn chapters(&self) -> &'static [&'static str] {
        match self {
            Subject::Biology => BIOLOGY_CHAPTERS,
            Subject::Chemistry => CHEMISTRY_CHAPTERS,
            Subject::Physics => PHYSICS_CHAPTERS,
        }
    }

    /// 주요 단원 영역 요약 (주제 검증 프롬프트용)
    pub fn coverage(&self) -> &'static str {
        match self {
            Subject::Biology => {
                "Reproduction, Genetics, Evolution, Plant Physiology, Human Systems, \
                 Ecology, Biotechnology"
            }
            Subject::Chemistry => {
                "Solid State, Solutions, Thermodynamics, Electrochemistry, \
                 Organic Chemistry, Coordination Compounds"
            }
            Subject::Physics => {
                "Rotational Dynamics, Fluids, Thermodynamics, Waves, Optics, \
                 Electromagnetism, Modern Physics, Semiconductors"
            }
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

impl FromStr for Subject {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "biology" | "bio" => Ok(Subject::Biology),
            "chemistry" | "chem" => Ok(Subject::Chemistry),
            "physics" | "phy" => Ok(Subject::Physics),
            other => anyhow::bail!(
                "Unknown subject: '{}'. Expected biology, chemistry, or physics",
                other
            ),
        }
    }
}

// ============================================================================
// Chapter Tables
// ============================================================================

/// Biology 단원 (Class 12 교과서 순서)
pub const BIOLOGY_CHAPTERS: &[&str] = &[
    "Reproduction in Lower and Higher Plants",
    "Reproduction in Lower and Higher Animals",
    "Inheritance and Variation",
    "Molecular Basis of Inheritance",
    "Origin and Evolution of Life",
    "Plant Water Relation",
    "Plant Growth and Mineral Nutrition",
    "Respiration and Circulation",
    "Control and Co-ordination",
    "Human Health and Diseases",
    "Enhancement of Food Production",
    "Biotechnology",
    "Organisms and Populations",
    "Ecosystems and Energy Flow",
    "Biodiversity, Conservation and Environmental Issues",
];

/// Chemistry 단원
pub const CHEMISTRY_CHAPTERS: &[&str] = &[
    "Solid State",
    "Solutions",
    "Ionic Equilibria",
    "Chemical Thermodynamics",
    "Electrochemistry",
    "Chemical Kinetics",
    "Elements of Groups 16, 17 and 18",
    "Transition and Inner transition Elements",
    "Coordination Compounds",
    "Halogen Derivatives",
    "Alcohols, Phenols and Ethers",
    "Aldehydes, Ketones and Carboxylic acids",
    "Amines",
    "Biomolecules",
    "Introduction to Polymer Chemistry",
    "Green Chemistry and Nanochemistry",
];

/// Physics 단원
pub const PHYSICS_CHAPTERS: &[&str] = &[
    "Rotational Dynamics",
    "Mechanical Properties of Fluids",
    "Kinetic Theory of Gases and Radiation",
    "Thermodynamics",
    "Oscillations",
    "Superposition of Waves",
    "Wave Optics",
    "Electrostatics",
    "Current Electricity",
    "Magnetic Fields due to Electric Current",
    "Magnetic Materials",
    "Electromagnetic induction",
    "AC Circuits",
    "Dual Nature of Radiation and Matter",
    "Structure of Atoms and Nuclei",
    "Semiconductor Devices",
];

// ============================================================================
// Keyword Chapter Matching
// ============================================================================

/// 단원 매칭에 사용할 컨텍스트 접두 길이 (문자 수)
const CONTEXT_PREFIX_CHARS: usize = 1000;

/// 점수 계산에서 무시하는 짧은 단어 기준 ("and", "the" 등)
const MIN_WORD_LEN: usize = 4;

/// 키워드 점수로 단원 추정
///
/// 주제와 검색 컨텍스트의 앞부분을 합쳐 각 단원 이름과 단어 단위로
/// 대조합니다. 단원 이름의 단어가 본문에 나타나면 +1, 주제의 단어가
/// 단원 이름에 나타나면 +2. 점수가 0이면 None을 반환합니다.
pub fn match_chapter(subject: Subject, topic: &str, context: &str) -> Option<&'static str> {
    let prefix: String = context.chars().take(CONTEXT_PREFIX_CHARS).collect();
    let combined = format!("{} {}", topic, prefix).to_lowercase();

    let topic_words: Vec<String> = topic
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.len() >= MIN_WORD_LEN)
        .map(|w| w.to_string())
        .collect();

    let mut best: Option<(&'static str, usize)> = None;

    for &chapter in subject.chapters() {
        let chapter_lower = chapter.to_lowercase();
        let mut score = 0usize;

        // 단원 이름의 단어가 본문에 등장하는지
        for word in chapter_lower.split_whitespace() {
            if word.len() >= MIN_WORD_LEN && combined.contains(word) {
                score += 1;
            }
        }

        // 주제 단어가 단원 이름에 등장하면 가중치
        for word in &topic_words {
            if chapter_lower.contains(word.as_str()) {
                score += 2;
            }
        }

        if score > 0 {
            match best {
                Some((_, best_score)) if best_score >= score => {}
                _ => best = Some((chapter, score)),
            }
        }
    }

    if let Some((chapter, score)) = best {
        tracing::debug!("Matched chapter: {} (score: {})", chapter, score);
    }

    best.map(|(chapter, _)| chapter)
}

/// 단원 이름이 과목의 단원 목록에 있는지 확인 (부분 일치 허용)
///
/// LLM 응답의 단원 이름을 정식 단원 이름으로 정규화할 때 사용합니다.
pub fn resolve_chapter(subject: Subject, name: &str) -> Option<&'static str> {
    let name_lower = name.trim().to_lowercase();
    if name_lower.is_empty() {
        return None;
    }

    subject.chapters().iter().copied().find(|ch| {
        let ch_lower = ch.to_lowercase();
        ch_lower.contains(&name_lower) || name_lower.contains(&ch_lower)
    })
}

// ============================================================================
// Tests
// ============================================================================

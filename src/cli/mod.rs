//! CLI 모듈
//!
//! pcb-tutor CLI 명령어 정의 및 구현

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use walkdir::WalkDir;

use crate::embedding::has_api_key;
use crate::generation::{has_groq_api_key, GroqClient};
use crate::knowledge::{get_data_dir, index_path, LanceVectorStore, Retriever, VectorStore};
use crate::mcq::McqService;
use crate::server;
use crate::syllabus::{self, Subject};

/// 기본 서버 포트 (데모 플랫폼 관례)
const DEFAULT_PORT: u16 = 7860;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "pcb-tutor")]
#[command(version, about = "Class 12 PCB MCQ 생성 데모", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 웹 서버 실행
    Serve {
        /// 바인딩 주소
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// 포트 (미지정 시 PORT 환경변수, 없으면 7860)
        #[arg(short, long)]
        port: Option<u16>,

        /// 데이터 디렉토리 (기본: ~/.pcb-tutor)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// 교과서 본문을 인덱스에 추가
    Ingest {
        /// 과목 (biology/chemistry/physics)
        #[arg(short, long)]
        subject: String,

        /// 단원 이름 (미지정 시 파일 이름에서 유추)
        #[arg(short, long)]
        chapter: Option<String>,

        /// 수집할 파일 경로 (.md/.txt/.pdf)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// 수집할 폴더 경로 (재귀)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// PDF 파일 건너뛰기
        #[arg(long)]
        skip_pdfs: bool,

        /// 기존 과목 인덱스를 비우고 다시 인덱싱
        #[arg(long)]
        replace: bool,

        /// 데이터 디렉토리 (기본: ~/.pcb-tutor)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// 터미널에서 MCQ 생성
    Ask {
        /// 주제
        topic: String,

        /// 과목 (biology/chemistry/physics)
        #[arg(short, long)]
        subject: String,

        /// 문항 수
        #[arg(short = 'n', long, default_value = "5")]
        count: u32,

        /// 데이터 디렉토리 (기본: ~/.pcb-tutor)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// 인덱스 검색 (디버깅용)
    Search {
        /// 검색 주제
        topic: String,

        /// 과목 (biology/chemistry/physics)
        #[arg(short, long)]
        subject: String,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "5")]
        limit: usize,

        /// 데이터 디렉토리 (기본: ~/.pcb-tutor)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// 상태 확인
    Status {
        /// 데이터 디렉토리 (기본: ~/.pcb-tutor)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve {
            host,
            port,
            data_dir,
        } => cmd_serve(&host, port, data_dir).await,
        Commands::Ingest {
            subject,
            chapter,
            file,
            dir,
            skip_pdfs,
            replace,
            data_dir,
        } => cmd_ingest(&subject, chapter, file, dir, skip_pdfs, replace, data_dir).await,
        Commands::Ask {
            topic,
            subject,
            count,
            data_dir,
        } => cmd_ask(&topic, &subject, count, data_dir).await,
        Commands::Search {
            topic,
            subject,
            limit,
            data_dir,
        } => cmd_search(&topic, &subject, limit, data_dir).await,
        Commands::Status { data_dir } => cmd_status(data_dir).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 서버 실행 명령어 (serve)
async fn cmd_serve(host: &str, port: Option<u16>, data_dir: Option<PathBuf>) -> Result<()> {
    require_gemini_key()?;
    require_groq_key()?;

    let data_dir = data_dir.unwrap_or_else(get_data_dir);
    let service = build_service(&data_dir).await?;

    let ip: IpAddr = host.parse().context("잘못된 호스트 주소")?;
    let addr = SocketAddr::new(ip, resolve_port(port));

    println!("[*] 서버 시작: http://{}", addr);
    println!("    데이터 디렉토리: {}", data_dir.display());

    server::serve(Arc::new(service), addr).await
}

/// 문서 수집 명령어 (ingest)
///
/// 파일 또는 폴더에서 교과서 본문을 읽어 인덱스에 추가합니다.
#[allow(clippy::too_many_arguments)]
async fn cmd_ingest(
    subject: &str,
    chapter: Option<String>,
    file: Option<PathBuf>,
    dir: Option<PathBuf>,
    skip_pdfs: bool,
    replace: bool,
    data_dir: Option<PathBuf>,
) -> Result<()> {
    require_gemini_key()?;

    let subject = Subject::from_str(subject)?;
    let data_dir = data_dir.unwrap_or_else(get_data_dir);

    let retriever = Retriever::open(&data_dir)
        .await
        .context("검색기 초기화 실패")?;

    // 재인덱싱이면 기존 과목 파티션부터 비움
    if replace {
        let removed = retriever
            .clear_subject(subject)
            .await
            .context("기존 인덱스 삭제 실패")?;
        if removed > 0 {
            println!("[*] 기존 {} 청크 삭제 ({})", removed, subject.title());
        }
    }

    // 파일 수집
    let files = if let Some(ref file_path) = file {
        if !file_path.is_file() {
            bail!("파일을 찾을 수 없습니다: {:?}", file_path);
        }
        vec![file_path.clone()]
    } else if let Some(ref dir_path) = dir {
        collect_content_files(dir_path, skip_pdfs)?
    } else {
        bail!("--file 또는 --dir를 지정해야 합니다");
    };

    if files.is_empty() {
        println!("[!] 수집할 파일이 없습니다.");
        return Ok(());
    }

    println!("[*] 수집 대상: {} 파일 ({})", files.len(), subject.title());

    let mut total_chunks = 0;
    let mut error_count = 0;

    for (i, path) in files.iter().enumerate() {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown");

        print!("[{}/{}] {}... ", i + 1, files.len(), file_name);

        let text = match extract_text(path).await {
            Ok(t) => t,
            Err(e) => {
                println!("실패: {}", e);
                error_count += 1;
                continue;
            }
        };

        // 단원 이름: --chapter 우선, 없으면 파일 이름에서 유추
        let chapter_name = chapter
            .clone()
            .unwrap_or_else(|| chapter_from_stem(path));

        if syllabus::resolve_chapter(subject, &chapter_name).is_none() {
            println!();
            println!("    [!] '{}'는 {} 단원 목록에 없는 이름입니다", chapter_name, subject.title());
            print!("    계속 진행... ");
        }

        match retriever.ingest(subject, &chapter_name, &text).await {
            Ok(count) => {
                println!("{} 청크", count);
                total_chunks += count;
            }
            Err(e) => {
                println!("실패: {}", e);
                error_count += 1;
            }
        }
    }

    println!();
    println!("[OK] 완료: {} 청크 저장, 실패 {}", total_chunks, error_count);

    Ok(())
}

/// MCQ 생성 명령어 (ask)
async fn cmd_ask(topic: &str, subject: &str, count: u32, data_dir: Option<PathBuf>) -> Result<()> {
    require_gemini_key()?;
    require_groq_key()?;

    let subject = Subject::from_str(subject)?;
    let data_dir = data_dir.unwrap_or_else(get_data_dir);

    let num_questions = crate::mcq::clamp_num_questions(Some(count));

    println!(
        "[*] {} 문항 생성 중: \"{}\" ({})",
        num_questions,
        topic,
        subject.title()
    );

    let service = build_service(&data_dir).await?;

    let generated = service.generate(subject, topic, num_questions).await?;

    println!();
    println!("[OK] 단원: {}", generated.chapter);
    println!();
    println!("{}", generated.mcqs);

    Ok(())
}

/// 검색 명령어 (search)
///
/// MCQ 생성 없이 벡터 검색 결과만 확인합니다.
async fn cmd_search(
    topic: &str,
    subject: &str,
    limit: usize,
    data_dir: Option<PathBuf>,
) -> Result<()> {
    require_gemini_key()?;

    let subject = Subject::from_str(subject)?;
    let data_dir = data_dir.unwrap_or_else(get_data_dir);

    println!("[*] 검색 중: \"{}\" ({})", topic, subject.title());

    let retriever = Retriever::open(&data_dir)
        .await
        .context("검색기 초기화 실패")?;

    let retrieved = retriever
        .retrieve(subject, topic, limit)
        .await
        .context("검색 실패")?;

    if retrieved.hits.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", retrieved.hits.len());

    for (i, hit) in retrieved.hits.iter().enumerate() {
        println!(
            "{}. [유사도: {:.4}] {}",
            i + 1,
            hit.similarity,
            hit.chapter
        );
        println!("   내용: {}", truncate_text(&hit.chunk_text, 200));
        println!();
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(data_dir: Option<PathBuf>) -> Result<()> {
    println!("pcb-tutor v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let data_dir = data_dir.unwrap_or_else(get_data_dir);
    println!("[*] 데이터 디렉토리: {}", data_dir.display());

    // API 키 상태
    if has_api_key() {
        println!("[OK] Gemini API 키: 설정됨");
    } else {
        println!("[!] Gemini API 키: 미설정");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    if has_groq_api_key() {
        println!("[OK] Groq API 키: 설정됨");
    } else {
        println!("[!] Groq API 키: 미설정");
        println!("    설정: export GROQ_API_KEY=your-key");
    }

    // 인덱스 통계 (API 키 불필요)
    match LanceVectorStore::open(&index_path(&data_dir)).await {
        Ok(store) => {
            let total = store.count().await.unwrap_or(0);
            println!("[OK] 인덱스: {} 청크", total);

            for subject in Subject::ALL {
                let count = store.count_subject(subject).await.unwrap_or(0);
                println!("     {}: {} 청크", subject.title(), count);
            }
        }
        Err(e) => {
            println!("[!] 인덱스 열기 실패: {}", e);
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 서비스 파이프라인 조립
async fn build_service(data_dir: &Path) -> Result<McqService> {
    let retriever = Retriever::open(data_dir)
        .await
        .context("검색기 초기화 실패")?;

    let groq = GroqClient::from_env().context("Groq 클라이언트 생성 실패")?;

    Ok(McqService::new(retriever, Arc::new(groq)))
}

/// Gemini API 키 확인
fn require_gemini_key() -> Result<()> {
    if !has_api_key() {
        bail!(
            "Gemini API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }
    Ok(())
}

/// Groq API 키 확인
fn require_groq_key() -> Result<()> {
    if !has_groq_api_key() {
        bail!(
            "Groq API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GROQ_API_KEY=your-api-key\n\n\
             API 키 발급: https://console.groq.com/keys"
        );
    }
    Ok(())
}

/// 포트 결정: 플래그 > PORT 환경변수 > 기본값
fn resolve_port(flag: Option<u16>) -> u16 {
    flag.or_else(|| {
        std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
    })
    .unwrap_or(DEFAULT_PORT)
}

/// 폴더에서 교과서 파일 수집 (.md/.txt/.pdf)
fn collect_content_files(dir: &Path, skip_pdfs: bool) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("폴더를 찾을 수 없습니다: {:?}", dir);
    }

    let mut files = Vec::new();

    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("Failed to read entry: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("md") | Some("txt") => files.push(path.to_path_buf()),
            Some("pdf") if !skip_pdfs => files.push(path.to_path_buf()),
            _ => {}
        }
    }

    files.sort();
    Ok(files)
}

/// 파일에서 텍스트 추출
///
/// PDF는 CPU 바운드이므로 spawn_blocking에서 추출합니다.
async fn extract_text(path: &Path) -> Result<String> {
    let is_pdf = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);

    if is_pdf {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read PDF: {:?}", path))?;

        let text = tokio::task::spawn_blocking(move || {
            pdf_extract::extract_text_from_mem(&bytes)
        })
        .await
        .context("PDF extraction task failed")?
        .with_context(|| format!("Failed to extract text from PDF: {:?}", path))?;

        if text.trim().is_empty() {
            tracing::warn!(
                "No text extracted from PDF: {:?}. It might be a scanned document.",
                path
            );
        }

        Ok(text)
    } else {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read text file: {:?}", path))
    }
}

/// 파일 이름에서 단원 이름 유추 ("molecular_basis-of_inheritance" -> "molecular basis of inheritance")
fn chapter_from_stem(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown");

    stem.replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chapter_from_stem() {
        assert_eq!(
            chapter_from_stem(Path::new("notes/wave_optics.md")),
            "wave optics"
        );
        assert_eq!(
            chapter_from_stem(Path::new("molecular-basis_of-inheritance.txt")),
            "molecular basis of inheritance"
        );
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_resolve_port_default() {
        assert_eq!(resolve_port(Some(8080)), 8080);
        // 플래그가 없으면 환경변수 또는 기본값 (CI 환경에 PORT가 없다고 가정)
        if std::env::var("PORT").is_err() {
            assert_eq!(resolve_port(None), DEFAULT_PORT);
        }
    }

    #[test]
    fn test_collect_content_files() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.md"), "alpha").unwrap();
        std::fs::write(dir.path().join("b.txt"), "beta").unwrap();
        std::fs::write(dir.path().join("c.pdf"), "pdf bytes").unwrap();
        std::fs::write(dir.path().join("d.png"), "image").unwrap();

        let all = collect_content_files(dir.path(), false).unwrap();
        assert_eq!(all.len(), 3);

        let no_pdf = collect_content_files(dir.path(), true).unwrap();
        assert_eq!(no_pdf.len(), 2);
    }
}

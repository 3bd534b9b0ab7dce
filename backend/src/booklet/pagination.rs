//! Page-to-question rule.
//!
//! Each question takes `expected_pages` contiguous physical pages, in question
//! order, starting at page 1. The booklet header shares page 1 with the first
//! question. Printing and reconciliation both go through `BookletLayout`, so a
//! page number always maps back to the question it was printed for.

use crate::db::journeys::JourneyQuestion;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSlot {
    pub page_number: u16,
    pub question_id: Uuid,
    /// 1-based position of the question in the journey.
    pub question_number: usize,
    /// 1-based page within the question.
    pub part: u16,
    pub parts: u16,
}

#[derive(Debug, Clone)]
struct QuestionSpan {
    question_id: Uuid,
    first_page: u32,
    pages: u16,
}

#[derive(Debug, Clone)]
pub struct BookletLayout {
    spans: Vec<QuestionSpan>,
    total_pages: u32,
}

impl BookletLayout {
    pub fn new(questions: &[JourneyQuestion]) -> Self {
        let mut next_page = 1u32;
        let spans = questions
            .iter()
            .map(|q| {
                let pages = q.expected_pages.max(1);
                let span = QuestionSpan {
                    question_id: q.id,
                    first_page: next_page,
                    pages,
                };
                next_page += pages as u32;
                span
            })
            .collect();
        Self {
            spans,
            total_pages: next_page - 1,
        }
    }

    /// Pages per participant booklet.
    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    pub fn question_for_page(&self, page_number: u16) -> Option<PageSlot> {
        let page = page_number as u32;
        let idx = self
            .spans
            .partition_point(|span| span.first_page + span.pages as u32 <= page);
        let span = self.spans.get(idx)?;
        if page < span.first_page {
            return None;
        }
        Some(PageSlot {
            page_number,
            question_id: span.question_id,
            question_number: idx + 1,
            part: (page - span.first_page) as u16 + 1,
            parts: span.pages,
        })
    }

    /// Every slot of one booklet, in page order.
    pub fn slots(&self) -> Vec<PageSlot> {
        (1..=self.total_pages.min(u16::MAX as u32) as u16)
            .filter_map(|n| self.question_for_page(n))
            .collect()
    }

    /// Page numbers printed for `question_id`, empty if it is not in the journey.
    pub fn pages_of(&self, question_id: Uuid) -> Vec<u16> {
        self.spans
            .iter()
            .find(|s| s.question_id == question_id)
            .map(|s| (0..s.pages).map(|i| (s.first_page + i as u32) as u16).collect())
            .unwrap_or_default()
    }
}

use crate::booklet::pagination::{BookletLayout, PageSlot};
use crate::codec::encode_compact;
use crate::db::journeys::{load_journey, participants, Journey, Participant};
use crate::db::page_codes::ensure_page_code;
use crate::error::{PipelineError, Result};
use crate::symbol::{render, RenderedSymbol};
use common::model::identifier::IdentifierPayload;
use log::{debug, info};
use rusqlite::Connection;
use uuid::Uuid;

/// Everything printed in the stamp band of one physical page.
pub struct PageStamp {
    pub payload: IdentifierPayload,
    pub short_code: String,
    pub symbol: RenderedSymbol,
    pub slot: PageSlot,
}

pub struct ParticipantBooklet {
    pub participant: Participant,
    pub pages: Vec<PageStamp>,
}

pub struct BookletPlan {
    pub journey: Journey,
    pub layout: BookletLayout,
    pub booklets: Vec<ParticipantBooklet>,
}

impl BookletPlan {
    /// Physical pages of the whole print job.
    pub fn page_count(&self) -> usize {
        self.booklets.iter().map(|b| b.pages.len()).sum()
    }

    pub fn stamps(&self) -> impl Iterator<Item = &PageStamp> {
        self.booklets.iter().flat_map(|b| b.pages.iter())
    }
}

/// Reserves a `PageCode` and renders the symbol for every page of every
/// participant. Running it again for the same journey reuses the stored codes.
pub fn plan_booklet(conn: &Connection, journey_id: Uuid) -> Result<BookletPlan> {
    let journey = load_journey(conn, journey_id)?;
    if journey.questions.is_empty() {
        return Err(PipelineError::InvalidState(format!(
            "journey {} has no questions",
            journey_id
        )));
    }
    let people = participants(conn, journey_id)?;
    if people.is_empty() {
        return Err(PipelineError::InvalidState(format!(
            "journey {} has no participants",
            journey_id
        )));
    }

    let layout = BookletLayout::new(&journey.questions);
    if layout.total_pages() > u16::MAX as u32 {
        return Err(PipelineError::InvalidState(format!(
            "journey {} needs {} pages per booklet",
            journey_id,
            layout.total_pages()
        )));
    }

    let mut booklets = Vec::with_capacity(people.len());
    for participant in people {
        let mut pages = Vec::new();
        for slot in layout.slots() {
            let payload = IdentifierPayload::new(journey_id, participant.user_id, slot.page_number)
                .ok_or_else(|| PipelineError::InvalidState("page numbers start at 1".into()))?;
            let page_code = ensure_page_code(conn, &payload.key())?;
            let symbol = render(&encode_compact(&payload))?;
            pages.push(PageStamp {
                payload,
                short_code: page_code.code,
                symbol,
                slot,
            });
        }
        debug!(
            "Planned {} pages for participant {}",
            pages.len(),
            participant.user_id
        );
        booklets.push(ParticipantBooklet { participant, pages });
    }

    let plan = BookletPlan {
        journey,
        layout,
        booklets,
    };
    info!(
        "Booklet plan for journey {}: {} participants, {} pages",
        journey_id,
        plan.booklets.len(),
        plan.page_count()
    );
    Ok(plan)
}

use deskmate_common::{Message, Nudge};

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are Deskmate, the office assistant every employee wishes they had. Reply in the language \
the user writes in (Bahasa Melayu or English), keep it relaxed but professional, and use the \
occasional emoji.

RULES:
1. Tools are the source of truth. Never guess balances, bookings or claims; look them up.
2. You already know who the user is. Never ask for their ID.
3. You can read images. For receipts and invoices extract the amount, merchant and date before \
submitting a claim.
4. Use search_policy for any question about the handbook, benefits, leave rules or working hours.
5. If there are unread notifications, bring them up as a friendly reminder.
6. When a tool fails, explain what happened plainly and suggest another way forward.
7. Confirm every completed action with its details.
8. Resolve relative dates (tomorrow, next Monday) with get_today_info first.

TOOLS: leave (balance, apply, history), rooms (list, availability, book, my bookings), claims \
(categories, submit, history), policy search, today's date, nudges.";

/// System prompt for one turn: the persona followed by the caller's identity.
pub fn build_system_prompt(base: Option<&str>, user_id: &str) -> String {
    let base = base.filter(|b| !b.trim().is_empty()).unwrap_or(DEFAULT_SYSTEM_PROMPT);
    format!(
        "{base}\n\nCURRENT USER ID: {user_id}\nEvery tool already acts on behalf of this user."
    )
}

/// System-kind notice listing unread nudges, or `None` when there are none.
pub fn nudge_notice(nudges: &[Nudge]) -> Option<Message> {
    if nudges.is_empty() {
        return None;
    }
    let lines = nudges
        .iter()
        .map(|n| format!("- {}: {}", n.title, n.content))
        .collect::<Vec<_>>()
        .join("\n");
    Some(Message::system(format!(
        "IMPORTANT: The user has UNREAD NOTIFICATIONS that require action:\n{lines}\n\n\
         You MUST proactively mention these to the user in your response \
         (e.g. 'By the way, I noticed you have...'). Do not ignore this context."
    )))
}

pub mod conversation_store;
pub mod migrations;
pub mod nudge_store;
pub mod workplace_store;

pub use conversation_store::{Conversation, ConversationStore};
pub use nudge_store::NudgeStore;
pub use workplace_store::{
    BookingSlot, Claim, ClaimCategory, LeaveBalance, LeaveRequest, LeaveType, NewClaim,
    NewLeaveRequest, PolicySnippet, Room, RoomBooking, WorkplaceStore,
};

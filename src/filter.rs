use crate::models::Room;

/// Predicate set applied to the merged availability list before ranking.
/// Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct RoomFilter {
    pub min_seats: Option<u32>,
    pub campus: Option<String>,
}

impl RoomFilter {
    pub fn matches(&self, room: &Room) -> bool {
        if let Some(min_seats) = self.min_seats {
            // rooms with unknown capacity (0) are kept rather than hidden
            if room.seats != 0 && room.seats < min_seats {
                return false;
            }
        }
        if let Some(campus) = &self.campus {
            if !room.campus.eq_ignore_ascii_case(campus) {
                return false;
            }
        }
        true
    }

    pub fn apply(&self, rooms: Vec<Room>) -> Vec<Room> {
        rooms.into_iter().filter(|room| self.matches(room)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(id: &str, seats: u32, campus: &str) -> Room {
        let mut room = Room::new("TimeEdit", id);
        room.seats = seats;
        room.campus = campus.to_string();
        room
    }

    #[test]
    fn test_default_filter_matches_everything() {
        let filter = RoomFilter::default();
        assert!(filter.matches(&room("R1", 0, "")));
        assert!(filter.matches(&room("R2", 4, "Johanneberg")));
    }

    #[test]
    fn test_min_seats_filters_small_rooms_but_keeps_unknown() {
        let filter = RoomFilter {
            min_seats: Some(6),
            ..Default::default()
        };
        assert!(!filter.matches(&room("small", 4, "")));
        assert!(filter.matches(&room("big", 8, "")));
        assert!(filter.matches(&room("unknown", 0, "")));
    }

    #[test]
    fn test_campus_is_case_insensitive() {
        let filter = RoomFilter {
            campus: Some("johanneberg".into()),
            ..Default::default()
        };
        assert!(filter.matches(&room("R1", 0, "Johanneberg")));
        assert!(!filter.matches(&room("R2", 0, "Lindholmen")));
    }

    #[test]
    fn test_apply_combines_predicates() {
        let filter = RoomFilter {
            min_seats: Some(6),
            campus: Some("Johanneberg".into()),
        };
        let rooms = vec![
            room("keep", 8, "Johanneberg"),
            room("wrong-campus", 8, "Lindholmen"),
            room("too-small", 4, "Johanneberg"),
        ];
        let kept = filter.apply(rooms);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "keep");
    }
}

use shared::BoardSnapshot;

/// Renders a snapshot as a status line followed by one line per grid row.
pub fn render_snapshot(snapshot: &BoardSnapshot) -> String {
    let header = &snapshot.header;
    let status = if header.game_over != 0 {
        "GAME OVER"
    } else if header.victory != 0 {
        "LEVEL CLEARED"
    } else {
        "playing"
    };

    let mut text = format!(
        "points {} | tempo {} ms | {}\n",
        header.points, header.tempo, status
    );
    for y in 0..header.height.max(0) as usize {
        text.push_str(&String::from_utf8_lossy(snapshot.row(y)));
        text.push('\n');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::BoardHeader;

    fn snapshot(victory: i32, game_over: i32) -> BoardSnapshot {
        BoardSnapshot {
            header: BoardHeader {
                width: 3,
                height: 2,
                tempo: 150,
                victory,
                game_over,
                points: 4,
            },
            cells: b"WWWP.@".to_vec(),
        }
    }

    #[test]
    fn test_render_rows() {
        assert_eq!(
            render_snapshot(&snapshot(0, 0)),
            "points 4 | tempo 150 ms | playing\nWWW\nP.@\n"
        );
    }

    #[test]
    fn test_render_status() {
        assert!(render_snapshot(&snapshot(1, 0)).contains("LEVEL CLEARED"));
        assert!(render_snapshot(&snapshot(0, 1)).contains("GAME OVER"));
    }
}

/// Cross product over a list of choice sets: every sequence built by
/// picking one element per slot, in slot order. Elements are cloned. An
/// empty choice set anywhere (or an empty list of slots) yields no
/// sequences.
///
/// ```
/// let v = vec![
///   vec![1],
///   vec![2, 3],
///   vec![4],
/// ];
///
/// assert_eq!(thicket::utils::combinations(&v), vec![
///   vec![1, 2, 4],
///   vec![1, 3, 4],
/// ]);
/// ```
pub fn combinations<T>(slots: &[Vec<T>]) -> Vec<Vec<T>>
where
  T: Clone,
{
  if slots.is_empty() {
    return Vec::new();
  }
  let mut sequences: Vec<Vec<T>> = vec![Vec::new()];
  for slot in slots {
    sequences = sequences
      .into_iter()
      .flat_map(|prefix| {
        slot.iter().map(move |choice| {
          let mut extended = prefix.clone();
          extended.push(choice.clone());
          extended
        })
      })
      .collect();
  }
  sequences
}

#[test]
fn test_empty_choice_set_yields_nothing() {
  let v: Vec<Vec<u32>> = vec![vec![1, 2], vec![], vec![3]];
  assert_eq!(combinations(&v), Vec::<Vec<u32>>::new());
}

#[test]
fn test_all_sequences_in_slot_order() {
  let v = vec![vec!['a', 'b'], vec!['x', 'y']];
  assert_eq!(
    combinations(&v),
    vec![
      vec!['a', 'x'],
      vec!['a', 'y'],
      vec!['b', 'x'],
      vec!['b', 'y'],
    ]
  );
}
